use super::domain::{ProspectRecord, ScoringSettings};

/// Turns settings plus one chunk of records into the text sent to the model.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, settings: &ScoringSettings, records: &[&ProspectRecord]) -> String;
}

/// Lead qualification prompt asking for one JSON result object per prospect, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchPrompt;

const BATCH_HEADER: &str = "\
You are a lead qualification assistant. Evaluate EACH prospect in the incoming list and return a JSON ARRAY with one result object per prospect.

Within `scoring_settings`, `company_description` and `exclusion_criteria` describe the seller; use them to understand the product and to filter out irrelevant prospects. All other fields (industries, employee_range, revenue_range, funding_stages, title_keywords, seniority_levels, buying_roles, locations, other_preferences) define the Ideal Customer Profile (ICP).

Consider company fit first (industry, size, revenue, hard stops), then persona fit (title, seniority, decision power), then timing signals (funding, hiring, growth, recent role changes). Treat missing fields as \"Unknown\" and do not penalize them. Do not invent data. If a location is required and the prospect is elsewhere, reduce the score noticeably; if that country is explicitly excluded, the score is 0.

SCORE BANDS
A (85-100): excellent fit, multiple matching signals
B (70-84): good fit, a few missing signals
C (31-69): partial or unclear fit
D (0-30): poor fit or explicit disqualification
Pick a specific value inside the band. The score MUST be an integer 0..100.

OUTPUT (STRICT JSON, no extra text)
Return exactly N objects for N prospects, in the SAME ORDER as the input:
[
  {
    \"prospect_id\": \"<copy from input>\",
    \"score\": <integer 0..100>,
    \"justification\": \"1-2 short English sentences citing explicit facts and the letter grade in parentheses\"
  }
]

Scoring Settings (full JSON)
";

impl PromptRenderer for BatchPrompt {
    fn render(&self, settings: &ScoringSettings, records: &[&ProspectRecord]) -> String {
        let settings_block =
            serde_json::to_string_pretty(settings).unwrap_or_else(|_| "{}".to_string());
        let prospects_block =
            serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string());

        format!(
            "{BATCH_HEADER}{settings_block}\n\nProspects ({count} items, full JSON)\n{prospects_block}",
            count = records.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_settings_and_records_in_order() {
        let settings = json!({ "industries": ["SaaS"] })
            .as_object()
            .cloned()
            .expect("object");
        let first = json!({ "prospect_id": "p1" }).as_object().cloned().expect("object");
        let second = json!({ "prospect_id": "p2" }).as_object().cloned().expect("object");

        let prompt = BatchPrompt.render(&settings, &[&first, &second]);

        assert!(prompt.starts_with("You are a lead qualification assistant."));
        assert!(prompt.contains("\"SaaS\""));
        assert!(prompt.contains("Prospects (2 items, full JSON)"));
        let first_at = prompt.find("\"p1\"").expect("first record rendered");
        let second_at = prompt.find("\"p2\"").expect("second record rendered");
        assert!(first_at < second_at);
    }
}
