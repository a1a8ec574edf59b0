//! The decision gate projection.
//!
//! [`DecisionSummary::project`] merges the results of the intake,
//! verification and assessment stages into the summary a reviewer sees at
//! the checkpoint. It is a pure function of the result map: any field whose
//! source stage is missing, or whose value is absent or of the wrong type,
//! falls back to the literal default listed on [`DecisionSummary`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{StagePayload, StageResults};

/// Default applicant name.
pub const DEFAULT_APPLICANT_NAME: &str = "Sarah Johnson";
/// Default employment description.
pub const DEFAULT_EMPLOYMENT: &str = "Freelance Marketing Consultant";
/// Default requested amount.
pub const DEFAULT_REQUESTED_AMOUNT: f64 = 45_000.0;
/// Default loan purpose.
pub const DEFAULT_LOAN_PURPOSE: &str = "Business Equipment Purchase";
/// Default annual income.
pub const DEFAULT_ANNUAL_INCOME: f64 = 85_000.0;
/// Default credit score.
pub const DEFAULT_CREDIT_SCORE: u32 = 742;
/// Default debt-to-income ratio.
pub const DEFAULT_DEBT_TO_INCOME: f64 = 0.28;
/// Default monthly payment.
pub const DEFAULT_MONTHLY_PAYMENT: f64 = 678.0;
/// Default loan term.
pub const DEFAULT_LOAN_TERM: &str = "72 months";
/// Default interest rate, in percent.
pub const DEFAULT_INTEREST_RATE: f64 = 6.4;
/// Default risk score.
pub const DEFAULT_RISK_SCORE: f64 = 0.23;
/// Default assessment confidence.
pub const DEFAULT_CONFIDENCE: f64 = 0.87;
/// Default recommendation.
pub const DEFAULT_RECOMMENDATION: &str = "APPROVE";
/// Default flagged items.
pub const DEFAULT_FLAGGED_ITEMS: [&str; 2] = ["Self-employed income", "First-time business borrower"];
/// Default account history.
pub const DEFAULT_ACCOUNT_HISTORY: &str = "18 months verified";
/// Default number of existing loans.
pub const DEFAULT_EXISTING_LOANS: u32 = 1;

/// Which stages feed the projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionSources {
    /// Stage supplying applicant identity and intake data.
    pub intake: String,
    /// Stage supplying credit score and account history.
    pub verification: String,
    /// Stage supplying risk figures and loan terms.
    pub assessment: String,
}

impl Default for DecisionSources {
    fn default() -> Self {
        Self {
            intake: "onboarding".to_string(),
            verification: "verification".to_string(),
            assessment: "assessment".to_string(),
        }
    }
}

/// Reviewer-facing summary built at the checkpoint.
///
/// | Field | Source | Default |
/// |---|---|---|
/// | `applicant_name` | intake `applicant_data.name` | `"Sarah Johnson"` |
/// | `employment` | intake `applicant_data.employment` | `"Freelance Marketing Consultant"` |
/// | `requested_amount` | intake `applicant_data.requested_amount` | `45000` |
/// | `loan_purpose` | intake `applicant_data.loan_purpose` | `"Business Equipment Purchase"` |
/// | `annual_income` | intake `applicant_data.income` | `85000` |
/// | `credit_score` | verification `credit_score` | `742` |
/// | `debt_to_income` | assessment `dti_ratio`, then verification `debt_to_income` | `0.28` |
/// | `monthly_payment` | assessment `monthly_payment` | `678` |
/// | `loan_term` | assessment `loan_term` | `"72 months"` |
/// | `interest_rate` | assessment `interest_rate` | `6.4` |
/// | `risk_score` | assessment `risk_score` | `0.23` |
/// | `confidence` | assessment `confidence` | `0.87` |
/// | `recommendation` | assessment `recommendation` | `"APPROVE"` |
/// | `flagged_items` | assessment `flags` | `["Self-employed income", "First-time business borrower"]` |
/// | `account_history` | verification `account_history` | `"18 months verified"` |
/// | `existing_loans` | verification `existing_loans` | `1` |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionSummary {
    /// Applicant name.
    pub applicant_name: String,
    /// Employment description.
    pub employment: String,
    /// Requested loan amount.
    pub requested_amount: f64,
    /// Stated purpose of the loan.
    pub loan_purpose: String,
    /// Annual income.
    pub annual_income: f64,
    /// Credit score.
    pub credit_score: u32,
    /// Debt-to-income ratio.
    pub debt_to_income: f64,
    /// Monthly payment.
    pub monthly_payment: f64,
    /// Loan term.
    pub loan_term: String,
    /// Interest rate in percent.
    pub interest_rate: f64,
    /// Risk score in `[0, 1]`.
    pub risk_score: f64,
    /// Assessment confidence in `[0, 1]`.
    pub confidence: f64,
    /// Automated recommendation.
    pub recommendation: String,
    /// Items flagged for the reviewer.
    pub flagged_items: Vec<String>,
    /// Verified account history.
    pub account_history: String,
    /// Number of existing loans.
    pub existing_loans: u32,
}

impl Default for DecisionSummary {
    fn default() -> Self {
        Self {
            applicant_name: DEFAULT_APPLICANT_NAME.to_string(),
            employment: DEFAULT_EMPLOYMENT.to_string(),
            requested_amount: DEFAULT_REQUESTED_AMOUNT,
            loan_purpose: DEFAULT_LOAN_PURPOSE.to_string(),
            annual_income: DEFAULT_ANNUAL_INCOME,
            credit_score: DEFAULT_CREDIT_SCORE,
            debt_to_income: DEFAULT_DEBT_TO_INCOME,
            monthly_payment: DEFAULT_MONTHLY_PAYMENT,
            loan_term: DEFAULT_LOAN_TERM.to_string(),
            interest_rate: DEFAULT_INTEREST_RATE,
            risk_score: DEFAULT_RISK_SCORE,
            confidence: DEFAULT_CONFIDENCE,
            recommendation: DEFAULT_RECOMMENDATION.to_string(),
            flagged_items: DEFAULT_FLAGGED_ITEMS.iter().map(|s| (*s).to_string()).collect(),
            account_history: DEFAULT_ACCOUNT_HISTORY.to_string(),
            existing_loans: DEFAULT_EXISTING_LOANS,
        }
    }
}

impl DecisionSummary {
    /// Projects the summary using the default source stages.
    pub fn project(results: &StageResults) -> Self {
        Self::project_with(results, &DecisionSources::default())
    }

    /// Projects the summary from the given source stages.
    pub fn project_with(results: &StageResults, sources: &DecisionSources) -> Self {
        let intake = results
            .get(&sources.intake)
            .and_then(|payload| payload.get("applicant_data"));
        let verification = results.get(&sources.verification);
        let assessment = results.get(&sources.assessment);
        let defaults = Self::default();

        Self {
            applicant_name: string_field(intake, "name").unwrap_or(defaults.applicant_name),
            employment: string_field(intake, "employment").unwrap_or(defaults.employment),
            requested_amount: number_field(intake, "requested_amount")
                .unwrap_or(defaults.requested_amount),
            loan_purpose: string_field(intake, "loan_purpose").unwrap_or(defaults.loan_purpose),
            annual_income: number_field(intake, "income").unwrap_or(defaults.annual_income),
            credit_score: count_field(verification, "credit_score")
                .unwrap_or(defaults.credit_score),
            debt_to_income: number_field(assessment, "dti_ratio")
                .or_else(|| number_field(verification, "debt_to_income"))
                .unwrap_or(defaults.debt_to_income),
            monthly_payment: number_field(assessment, "monthly_payment")
                .unwrap_or(defaults.monthly_payment),
            loan_term: string_field(assessment, "loan_term").unwrap_or(defaults.loan_term),
            interest_rate: number_field(assessment, "interest_rate")
                .unwrap_or(defaults.interest_rate),
            risk_score: number_field(assessment, "risk_score").unwrap_or(defaults.risk_score),
            confidence: number_field(assessment, "confidence").unwrap_or(defaults.confidence),
            recommendation: string_field(assessment, "recommendation")
                .unwrap_or(defaults.recommendation),
            flagged_items: string_list_field(assessment, "flags").unwrap_or(defaults.flagged_items),
            account_history: string_field(verification, "account_history")
                .unwrap_or(defaults.account_history),
            existing_loans: count_field(verification, "existing_loans")
                .unwrap_or(defaults.existing_loans),
        }
    }

    /// Returns true if the assessment confidence is above `threshold`.
    ///
    /// Only used for logging; the checkpoint always suspends.
    pub fn is_high_confidence(&self, threshold: f64) -> bool {
        self.confidence > threshold
    }

    /// Returns the summary as a JSON object.
    pub fn to_payload(&self) -> StagePayload {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn field<'a>(source: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    source.and_then(|value| value.get(key))
}

fn string_field(source: Option<&Value>, key: &str) -> Option<String> {
    field(source, key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn number_field(source: Option<&Value>, key: &str) -> Option<f64> {
    field(source, key).and_then(Value::as_f64)
}

fn count_field(source: Option<&Value>, key: &str) -> Option<u32> {
    field(source, key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn string_list_field(source: Option<&Value>, key: &str) -> Option<Vec<String>> {
    field(source, key)?
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StageCatalog;
    use serde_json::json;

    fn canned_results() -> StageResults {
        let catalog = StageCatalog::loan_origination();
        ["onboarding", "verification", "assessment"]
            .into_iter()
            .map(|id| (id.to_string(), catalog.get(id).unwrap().profile.payload.clone()))
            .collect()
    }

    #[test]
    fn test_empty_results_yield_defaults() {
        let summary = DecisionSummary::project(&StageResults::new());
        assert_eq!(summary.applicant_name, "Sarah Johnson");
        assert_eq!(summary.employment, "Freelance Marketing Consultant");
        assert_eq!(summary.requested_amount, 45_000.0);
        assert_eq!(summary.loan_purpose, "Business Equipment Purchase");
        assert_eq!(summary.annual_income, 85_000.0);
        assert_eq!(summary.credit_score, 742);
        assert_eq!(summary.debt_to_income, 0.28);
        assert_eq!(summary.monthly_payment, 678.0);
        assert_eq!(summary.loan_term, "72 months");
        assert_eq!(summary.interest_rate, 6.4);
        assert_eq!(summary.risk_score, 0.23);
        assert_eq!(summary.confidence, 0.87);
        assert_eq!(summary.recommendation, "APPROVE");
        assert_eq!(
            summary.flagged_items,
            vec!["Self-employed income", "First-time business borrower"]
        );
        assert_eq!(summary.account_history, "18 months verified");
        assert_eq!(summary.existing_loans, 1);
        assert_eq!(summary, DecisionSummary::default());
    }

    #[test]
    fn test_values_taken_from_results() {
        let mut results = StageResults::new();
        results.insert(
            "onboarding".to_string(),
            json!({"applicant_data": {"name": "Ada Byron", "requested_amount": 12000, "income": 99000}}),
        );
        results.insert(
            "verification".to_string(),
            json!({"credit_score": 801, "existing_loans": 0, "account_history": "4 years verified"}),
        );
        results.insert(
            "assessment".to_string(),
            json!({"risk_score": 0.61, "recommendation": "DECLINE", "flags": ["Thin file"], "confidence": 0.52}),
        );

        let summary = DecisionSummary::project(&results);
        assert_eq!(summary.applicant_name, "Ada Byron");
        assert_eq!(summary.requested_amount, 12_000.0);
        assert_eq!(summary.annual_income, 99_000.0);
        assert_eq!(summary.credit_score, 801);
        assert_eq!(summary.existing_loans, 0);
        assert_eq!(summary.account_history, "4 years verified");
        assert_eq!(summary.risk_score, 0.61);
        assert_eq!(summary.recommendation, "DECLINE");
        assert_eq!(summary.flagged_items, vec!["Thin file"]);
        // Fields the stages did not supply keep their defaults.
        assert_eq!(summary.employment, DEFAULT_EMPLOYMENT);
        assert_eq!(summary.loan_term, DEFAULT_LOAN_TERM);
    }

    #[test]
    fn test_debt_to_income_falls_back_to_verification() {
        let mut results = StageResults::new();
        results.insert("verification".to_string(), json!({"debt_to_income": 0.41}));
        assert_eq!(DecisionSummary::project(&results).debt_to_income, 0.41);

        results.insert("assessment".to_string(), json!({"dti_ratio": 0.33}));
        assert_eq!(DecisionSummary::project(&results).debt_to_income, 0.33);
    }

    #[test]
    fn test_wrong_types_use_defaults() {
        let mut results = StageResults::new();
        results.insert(
            "verification".to_string(),
            json!({"credit_score": "excellent", "existing_loans": -2}),
        );
        results.insert("assessment".to_string(), json!({"flags": ["ok", 3]}));
        let summary = DecisionSummary::project(&results);
        assert_eq!(summary.credit_score, DEFAULT_CREDIT_SCORE);
        assert_eq!(summary.existing_loans, DEFAULT_EXISTING_LOANS);
        assert_eq!(summary.flagged_items.len(), 2);
        assert_eq!(summary.flagged_items[0], DEFAULT_FLAGGED_ITEMS[0]);
    }

    #[test]
    fn test_canned_payloads_match_defaults() {
        let summary = DecisionSummary::project(&canned_results());
        assert_eq!(summary, DecisionSummary::default());
    }

    #[test]
    fn test_projection_is_idempotent() {
        let results = canned_results();
        let first = DecisionSummary::project(&results);
        let second = DecisionSummary::project(&results);
        assert_eq!(first, second);
    }

    #[test]
    fn test_custom_sources() {
        let mut results = StageResults::new();
        results.insert("intake".to_string(), json!({"applicant_data": {"name": "Grace"}}));
        let sources = DecisionSources {
            intake: "intake".to_string(),
            ..DecisionSources::default()
        };
        assert_eq!(DecisionSummary::project_with(&results, &sources).applicant_name, "Grace");
        assert_eq!(DecisionSummary::project(&results).applicant_name, DEFAULT_APPLICANT_NAME);
    }

    #[test]
    fn test_high_confidence() {
        let summary = DecisionSummary::default();
        assert!(summary.is_high_confidence(0.85));
        assert!(!summary.is_high_confidence(0.9));
    }

    #[test]
    fn test_to_payload() {
        let payload = DecisionSummary::default().to_payload();
        assert_eq!(payload["applicant_name"], "Sarah Johnson");
        assert_eq!(payload["credit_score"], 742);
    }
}
