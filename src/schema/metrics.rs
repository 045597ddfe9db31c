//! Per-backend metrics schemas.
//!
//! Metrics are an open JSON mapping whose shape depends on which extractor
//! produced them. Each [`MetricsSchema`] lists the indicator fields its
//! backend is known to emit together with their JSON type. Validation only
//! checks the fields it knows about; anything else is carried through
//! untouched so a newer backend release does not start failing uploads.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat indicator mapping returned by an extractor.
pub type Metrics = Map<String, Value>;

/// Expected JSON type of a metrics field. `null` is always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// `true`/`false`; `0`/`1` are accepted as well.
    Boolean,
    /// Whole numbers; floats with no fractional part are accepted.
    Integer,
    /// Any JSON number.
    Number,
    String,
    /// Array of strings.
    StringList,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Boolean, Value::Number(n)) => matches!(n.as_i64(), Some(0) | Some(1)),
            (FieldType::Integer, Value::Number(n)) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            (FieldType::Number, Value::Number(_)) => true,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::StringList, Value::Array(items)) => items.iter().all(Value::is_string),
            _ => false,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            FieldType::Boolean => "a boolean",
            FieldType::Integer => "an integer",
            FieldType::Number => "a number",
            FieldType::String => "a string",
            FieldType::StringList => "a list of strings",
        }
    }
}

/// Name of the JSON type of `value`, for error messages.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Which backend's field table applies to a metrics mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSchema {
    /// rtransparent output (R package, one row per document).
    #[default]
    RTransparent,
    /// Structured LLM extraction output.
    Llm,
}

impl MetricsSchema {
    /// Known fields and their types.
    pub fn fields(self) -> &'static [(&'static str, FieldType)] {
        match self {
            MetricsSchema::RTransparent => RTRANSPARENT_FIELDS,
            MetricsSchema::Llm => LLM_FIELDS,
        }
    }

    pub fn field_type(self, name: &str) -> Option<FieldType> {
        self.fields()
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, ty)| *ty)
    }

    /// Check every known field in `metrics` against its declared type.
    pub fn check(self, metrics: &Metrics) -> Result<(), ValidationError> {
        for (name, value) in metrics {
            if let Some(ty) = self.field_type(name) {
                if !ty.accepts(value) {
                    return Err(ValidationError::new(
                        format!("metrics.{name}"),
                        format!("expected {}, found {}", ty.describe(), json_type_name(value)),
                    ));
                }
            }
        }
        Ok(())
    }
}

const RTRANSPARENT_FIELDS: &[(&str, FieldType)] = &[
    ("pmcid_pmc", FieldType::Integer),
    ("pmid", FieldType::Integer),
    ("doi", FieldType::String),
    ("filename", FieldType::String),
    ("year", FieldType::Integer),
    ("year_epub", FieldType::Integer),
    ("year_ppub", FieldType::Integer),
    ("journal", FieldType::String),
    ("publisher", FieldType::String),
    ("affiliation_country", FieldType::String),
    ("affiliation_institution", FieldType::String),
    ("type", FieldType::String),
    ("is_data_pred", FieldType::Boolean),
    ("data_text", FieldType::String),
    ("is_relevant_data", FieldType::Boolean),
    ("com_specific_db", FieldType::String),
    ("com_general_db", FieldType::String),
    ("com_github_data", FieldType::String),
    ("dataset", FieldType::String),
    ("com_file_formats", FieldType::String),
    ("com_supplemental_data", FieldType::String),
    ("com_data_availibility", FieldType::String),
    ("is_code_pred", FieldType::Boolean),
    ("code_text", FieldType::String),
    ("is_relevant_code", FieldType::Boolean),
    ("com_code", FieldType::String),
    ("com_suppl_code", FieldType::String),
    ("is_coi_pred", FieldType::Boolean),
    ("coi_text", FieldType::String),
    ("is_coi_pmc_fn", FieldType::Boolean),
    ("is_coi_pmc_title", FieldType::String),
    ("is_relevant_coi", FieldType::String),
    ("is_relevant_coi_hi", FieldType::String),
    ("is_relevant_coi_lo", FieldType::String),
    ("is_explicit_coi", FieldType::String),
    ("coi_1", FieldType::String),
    ("coi_2", FieldType::String),
    ("coi_disclosure_1", FieldType::String),
    ("commercial_1", FieldType::String),
    ("benefit_1", FieldType::String),
    ("consultant_1", FieldType::String),
    ("grants_1", FieldType::String),
    ("brief_1", FieldType::String),
    ("fees_1", FieldType::String),
    ("consults_1", FieldType::String),
    ("connect_1", FieldType::String),
    ("connect_2", FieldType::String),
    ("commercial_ack_1", FieldType::String),
    ("rights_1", FieldType::String),
    ("founder_1", FieldType::String),
    ("advisor_1", FieldType::String),
    ("paid_1", FieldType::String),
    ("board_1", FieldType::String),
    ("no_coi_1", FieldType::String),
    ("no_funder_role_1", FieldType::String),
    ("is_fund_pred", FieldType::Boolean),
    ("fund_text", FieldType::String),
    ("fund_pmc_institute", FieldType::String),
    ("fund_pmc_source", FieldType::String),
    ("fund_pmc_anysource", FieldType::String),
    ("is_fund_pmc_group", FieldType::Boolean),
    ("is_fund_pmc_title", FieldType::String),
    ("is_fund_pmc_anysource", FieldType::String),
    ("is_relevant_fund", FieldType::String),
    ("is_explicit_fund", FieldType::String),
    ("support_1", FieldType::String),
    ("support_3", FieldType::String),
    ("support_4", FieldType::String),
    ("support_5", FieldType::String),
    ("support_6", FieldType::String),
    ("support_7", FieldType::String),
    ("support_8", FieldType::String),
    ("support_9", FieldType::String),
    ("support_10", FieldType::String),
    ("developed_1", FieldType::String),
    ("received_1", FieldType::String),
    ("received_2", FieldType::String),
    ("recipient_1", FieldType::String),
    ("authors_1", FieldType::String),
    ("authors_2", FieldType::String),
    ("thank_1", FieldType::String),
    ("thank_2", FieldType::String),
    ("fund_1", FieldType::String),
    ("fund_2", FieldType::String),
    ("fund_3", FieldType::String),
    ("supported_1", FieldType::String),
    ("financial_1", FieldType::String),
    ("financial_2", FieldType::String),
    ("financial_3", FieldType::String),
    ("grant_1", FieldType::String),
    ("french_1", FieldType::String),
    ("common_1", FieldType::String),
    ("common_2", FieldType::String),
    ("common_3", FieldType::String),
    ("common_4", FieldType::String),
    ("common_5", FieldType::String),
    ("acknow_1", FieldType::String),
    ("disclosure_1", FieldType::String),
    ("disclosure_2", FieldType::String),
    ("fund_ack", FieldType::String),
    ("project_ack", FieldType::String),
    ("is_register_pred", FieldType::Boolean),
    ("register_text", FieldType::String),
    ("is_research", FieldType::Boolean),
    ("is_review", FieldType::Boolean),
    ("is_reg_pmc_title", FieldType::Boolean),
    ("is_relevant_reg", FieldType::String),
    ("is_method", FieldType::String),
    ("is_NCT", FieldType::String),
    ("is_explicit_reg", FieldType::String),
    ("prospero_1", FieldType::String),
    ("registered_1", FieldType::String),
    ("registered_2", FieldType::String),
    ("registered_3", FieldType::String),
    ("registered_4", FieldType::String),
    ("registered_5", FieldType::String),
    ("not_registered_1", FieldType::String),
    ("registration_1", FieldType::String),
    ("registration_2", FieldType::String),
    ("registration_3", FieldType::String),
    ("registration_4", FieldType::String),
    ("registry_1", FieldType::String),
    ("reg_title_1", FieldType::String),
    ("reg_title_2", FieldType::String),
    ("reg_title_3", FieldType::String),
    ("reg_title_4", FieldType::String),
    ("funded_ct_1", FieldType::String),
    ("ct_2", FieldType::String),
    ("ct_3", FieldType::String),
    ("protocol_1", FieldType::String),
    ("is_success", FieldType::Boolean),
    ("is_art", FieldType::String),
    ("field", FieldType::String),
    ("score", FieldType::Integer),
    ("jif", FieldType::Number),
    ("eigenfactor_score", FieldType::Number),
    ("n_cite", FieldType::Integer),
];

const LLM_FIELDS: &[(&str, FieldType)] = &[
    ("year", FieldType::Integer),
    ("journal", FieldType::String),
    ("article_type", FieldType::StringList),
    ("affiliation_country", FieldType::StringList),
    ("institute", FieldType::StringList),
    ("doi", FieldType::String),
    ("pmid", FieldType::Integer),
    ("pmcid", FieldType::String),
    ("title", FieldType::String),
    ("authors", FieldType::StringList),
    ("publisher", FieldType::String),
    ("is_open_code", FieldType::Boolean),
    ("code_sharing_statement", FieldType::String),
    ("is_open_data", FieldType::Boolean),
    ("data_sharing_statement", FieldType::String),
    ("has_coi_statement", FieldType::Boolean),
    ("coi_statement", FieldType::String),
    ("funder", FieldType::StringList),
    ("has_funding_statement", FieldType::Boolean),
    ("funding_statement", FieldType::String),
    ("has_registration_statement", FieldType::Boolean),
    ("registration_statement", FieldType::String),
    ("reasoning_steps", FieldType::StringList),
];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(v: Value) -> Metrics {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn unknown_fields_pass_through() {
        let m = metrics(json!({"is_open_data": true, "something_new": [1, 2]}));
        assert!(MetricsSchema::RTransparent.check(&m).is_ok());
    }

    #[test]
    fn null_is_always_accepted() {
        let m = metrics(json!({"score": null, "jif": null, "funder": null}));
        assert!(MetricsSchema::RTransparent.check(&m).is_ok());
        assert!(MetricsSchema::Llm.check(&m).is_ok());
    }

    #[test]
    fn wrong_type_names_the_field() {
        let m = metrics(json!({"year": "twenty twenty"}));
        let err = MetricsSchema::RTransparent.check(&m).unwrap_err();
        assert_eq!(err.field, "metrics.year");
        assert!(err.reason.contains("found string"), "got: {}", err.reason);
    }

    #[test]
    fn lenient_numeric_coercions() {
        let m = metrics(json!({"is_success": 1, "year": 2020.0, "jif": 3}));
        assert!(MetricsSchema::RTransparent.check(&m).is_ok());
        let m = metrics(json!({"year": 2020.5}));
        assert!(MetricsSchema::RTransparent.check(&m).is_err());
    }

    #[test]
    fn llm_lists_must_hold_strings() {
        let ok = metrics(json!({"funder": ["NIH", "Wellcome"]}));
        assert!(MetricsSchema::Llm.check(&ok).is_ok());
        let bad = metrics(json!({"funder": ["NIH", 3]}));
        assert_eq!(MetricsSchema::Llm.check(&bad).unwrap_err().field, "metrics.funder");
    }
}
