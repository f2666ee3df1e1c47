//! Admission Predictor Adapter: turns an externally produced risk
//! assessment plus patient features into ICU admission signals.
//!
//! Every formula is deterministic; identical inputs always derive an
//! identical signal.

use crate::models::{AdmissionSignal, PatientFeatures, RiskAssessment, RiskLevel};

/// Derives admission signals. Owned by the composition root and passed
/// in explicitly wherever signals are needed.
#[derive(Debug, Clone)]
pub struct AdmissionPredictor {
    /// Probability (percentage points) at which ICU need flips on.
    need_threshold: f64,
    /// Weighted-score cutoff for equipment requirements.
    equipment_threshold: f64,
}

impl Default for AdmissionPredictor {
    fn default() -> Self {
        Self { need_threshold: 50.0, equipment_threshold: 50.0 }
    }
}

impl AdmissionPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn derive_signal(
        &self,
        features: &PatientFeatures,
        assessment: &RiskAssessment,
    ) -> AdmissionSignal {
        let probability = admission_probability(features, assessment);

        AdmissionSignal {
            icu_needed: probability >= self.need_threshold,
            probability,
            risk_level: assessment.overall_risk,
            predicted_days: predicted_stay_days(features, assessment),
            ventilator_needed: ventilator_score(features, assessment) >= self.equipment_threshold,
            dialysis_needed: dialysis_score(features, assessment) >= self.equipment_threshold,
            priority_score: priority_score(features, assessment, probability),
        }
    }
}

/// Baseline by overall risk category plus additive clinical adjustments,
/// clamped to 0-99 percentage points.
fn admission_probability(features: &PatientFeatures, assessment: &RiskAssessment) -> f64 {
    let mut probability: f64 = match assessment.overall_risk {
        RiskLevel::Critical => 90.0,
        RiskLevel::High => 65.0,
        RiskLevel::Moderate => 25.0,
        RiskLevel::Low => 5.0,
    };

    if assessment.risks.cardiovascular >= 60.0 {
        probability += 15.0;
    }
    if assessment.risks.aki >= 60.0 {
        probability += 10.0;
    }
    if assessment.risks.mortality >= 50.0 {
        probability += 20.0;
    }
    if features.asa_class >= 4 {
        probability += 15.0;
    }
    if features.emergency_surgery {
        probability += 10.0;
    }
    if features.age > 75 {
        probability += 5.0;
    }

    probability.clamp(0.0, 99.0)
}

fn predicted_stay_days(features: &PatientFeatures, assessment: &RiskAssessment) -> f64 {
    let mut days = match assessment.overall_risk {
        RiskLevel::Critical => 7.0,
        RiskLevel::High => 4.0,
        RiskLevel::Moderate => 2.0,
        RiskLevel::Low => 1.0,
    };

    if assessment.risks.cardiovascular >= 70.0 {
        days += 3.0;
    } else if assessment.risks.cardiovascular >= 50.0 {
        days += 2.0;
    }
    if assessment.risks.aki >= 60.0 {
        days += 2.0;
    }
    if assessment.risks.mortality >= 50.0 {
        days += 3.0;
    }
    if features.age > 80 {
        days += 2.0;
    } else if features.age > 70 {
        days += 1.0;
    }
    if features.asa_class >= 4 {
        days += 2.0;
    }
    if features.emergency_surgery {
        days += 1.0;
    }

    days + 0.5 * features.comorbidity_count() as f64
}

fn ventilator_score(features: &PatientFeatures, assessment: &RiskAssessment) -> f64 {
    let mut score = 0.0;
    if assessment.risks.cardiovascular >= 70.0 {
        score += 40.0;
    } else if assessment.risks.cardiovascular >= 50.0 {
        score += 20.0;
    }
    if features.copd {
        score += 30.0;
    }
    if features.emergency_surgery {
        score += 15.0;
    }
    if assessment.risks.mortality >= 60.0 {
        score += 25.0;
    }
    if features.age > 75 {
        score += 10.0;
    }
    if features.asa_class >= 4 {
        score += 20.0;
    }
    score
}

fn dialysis_score(features: &PatientFeatures, assessment: &RiskAssessment) -> f64 {
    let mut score = 0.0;
    if assessment.risks.aki >= 70.0 {
        score += 60.0;
    } else if assessment.risks.aki >= 50.0 {
        score += 30.0;
    }
    if features.kidney_disease {
        score += 40.0;
    }
    if features.creatinine >= 2.5 {
        score += 30.0;
    } else if features.creatinine >= 2.0 {
        score += 15.0;
    }
    if features.diabetes {
        score += 10.0;
    }
    score
}

/// Urgency ranking: probability and mortality weighted, plus emergency,
/// age and ASA bonuses; clamped to 0-100 and rounded to one decimal.
fn priority_score(features: &PatientFeatures, assessment: &RiskAssessment, probability: f64) -> f64 {
    let mut score = 0.5 * probability + 0.3 * assessment.risks.mortality;
    if features.emergency_surgery {
        score += 10.0;
    }
    if features.age > 80 {
        score += 5.0;
    } else if features.age > 70 {
        score += 3.0;
    }
    if features.asa_class >= 4 {
        score += 5.0;
    } else if features.asa_class == 3 {
        score += 3.0;
    }

    (score.clamp(0.0, 100.0) * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComponentRisks;
    use test_case::test_case;

    fn features() -> PatientFeatures {
        PatientFeatures {
            age: 50,
            asa_class: 2,
            emergency_surgery: false,
            diabetes: false,
            hypertension: false,
            heart_disease: false,
            kidney_disease: false,
            copd: false,
            liver_disease: false,
            creatinine: 1.0,
        }
    }

    fn assessment(overall: RiskLevel, aki: f64, cardiovascular: f64, mortality: f64) -> RiskAssessment {
        RiskAssessment {
            overall_risk: overall,
            risks: ComponentRisks { aki, cardiovascular, transfusion: 0.0, mortality },
        }
    }

    #[test]
    fn critical_emergency_case_caps_probability_and_needs_ventilator() {
        let predictor = AdmissionPredictor::new();
        let mut features = features();
        features.age = 78;
        features.asa_class = 4;
        features.emergency_surgery = true;
        let assessment = assessment(RiskLevel::Critical, 10.0, 75.0, 55.0);

        let signal = predictor.derive_signal(&features, &assessment);

        // 90 + 15 (cardio) + 20 (mortality) + 15 (ASA) + 10 (emergency)
        // + 5 (age) = 155, capped at 99.
        assert!((signal.probability - 99.0).abs() < f64::EPSILON);
        assert!(signal.icu_needed);
        // cardio tier 40 + emergency 15 + age 10 + ASA 20 = 85.
        assert!(signal.ventilator_needed);
        assert_eq!(signal.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn derive_signal_is_deterministic() {
        let predictor = AdmissionPredictor::new();
        let features = features();
        let assessment = assessment(RiskLevel::High, 55.0, 62.0, 48.0);

        let first = predictor.derive_signal(&features, &assessment);
        let second = predictor.derive_signal(&features, &assessment);
        assert_eq!(first, second);
    }

    #[test_case(RiskLevel::Low, 5.0 ; "low baseline")]
    #[test_case(RiskLevel::Moderate, 25.0 ; "moderate baseline")]
    #[test_case(RiskLevel::High, 65.0 ; "high baseline")]
    #[test_case(RiskLevel::Critical, 90.0 ; "critical baseline")]
    fn probability_baseline_by_category(overall: RiskLevel, expected: f64) {
        let signal = AdmissionPredictor::new()
            .derive_signal(&features(), &assessment(overall, 0.0, 0.0, 0.0));
        assert!((signal.probability - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn need_flag_flips_at_fifty_percent() {
        let predictor = AdmissionPredictor::new();
        // MODERATE 25 + aki 10 = 35: below threshold.
        let below = predictor.derive_signal(&features(), &assessment(RiskLevel::Moderate, 60.0, 0.0, 0.0));
        assert!(!below.icu_needed);

        // MODERATE 25 + cardio 15 + aki 10 = 50: exactly at threshold.
        let at = predictor.derive_signal(&features(), &assessment(RiskLevel::Moderate, 60.0, 60.0, 0.0));
        assert!((at.probability - 50.0).abs() < f64::EPSILON);
        assert!(at.icu_needed);
    }

    #[test_case(49.9, false ; "just below tier")]
    #[test_case(50.0, true ; "twenty point tier needs copd help")]
    fn ventilator_tiers(cardiovascular: f64, expected: bool) {
        let mut features = features();
        features.copd = true; // +30
        let signal = AdmissionPredictor::new()
            .derive_signal(&features, &assessment(RiskLevel::Low, 0.0, cardiovascular, 0.0));
        assert_eq!(signal.ventilator_needed, expected);
    }

    #[test_case(70.0, false, 1.0, true ; "aki tier alone")]
    #[test_case(50.0, false, 2.0, false ; "mid aki plus mild creatinine misses")]
    #[test_case(0.0, true, 2.0, true ; "kidney disease plus creatinine")]
    #[test_case(0.0, false, 2.6, false ; "creatinine alone is not enough")]
    fn dialysis_tiers(aki: f64, kidney_disease: bool, creatinine: f64, expected: bool) {
        let mut features = features();
        features.kidney_disease = kidney_disease;
        features.creatinine = creatinine;
        let signal = AdmissionPredictor::new()
            .derive_signal(&features, &assessment(RiskLevel::Low, aki, 0.0, 0.0));
        assert_eq!(signal.dialysis_needed, expected);
    }

    #[test]
    fn stay_duration_accumulates_adjustments() {
        let mut features = features();
        features.age = 82;
        features.asa_class = 4;
        features.emergency_surgery = true;
        features.diabetes = true;
        features.hypertension = true;
        let assessment = assessment(RiskLevel::Critical, 65.0, 72.0, 55.0);

        let signal = AdmissionPredictor::new().derive_signal(&features, &assessment);
        // 7 + 3 (cardio>=70) + 2 (aki) + 3 (mortality) + 2 (age>80)
        // + 2 (ASA) + 1 (emergency) + 1.0 (two comorbidities) = 21.
        assert!((signal.predicted_days - 21.0).abs() < f64::EPSILON);
    }

    #[test]
    fn priority_combines_probability_mortality_and_bonuses() {
        let mut features = features();
        features.age = 72;
        features.asa_class = 3;
        let assessment = assessment(RiskLevel::High, 0.0, 0.0, 40.0);

        let signal = AdmissionPredictor::new().derive_signal(&features, &assessment);
        // 0.5 * 65 + 0.3 * 40 + 3 (age) + 3 (ASA 3) = 50.5.
        assert!((signal.priority_score - 50.5).abs() < f64::EPSILON);
        assert_eq!(signal.priority(), 51);
    }
}
