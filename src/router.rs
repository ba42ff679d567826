//! Chat message routing.
//!
//! A classification call decides whether a message is a requirement (run the
//! normalization pipeline) or a general question (answer it directly).
//! Anything but an explicit `"requirement"` intent is treated as general.
use crate::extract::extract_structured;
use crate::lm::TextGenerator;
use crate::normalize::{NormalizationRecord, RequirementNormalizer};
use crate::prompts;
use crate::warehouse::Warehouse;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Requirement,
    General,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneralAnswer {
    pub text: String,
}

/// Reply body for a routed chat message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum ChatReply {
    Requirement(NormalizationRecord),
    General { answer: GeneralAnswer },
}

impl ChatReply {
    pub fn intent(&self) -> Intent {
        match self {
            Self::Requirement(_) => Intent::Requirement,
            Self::General { .. } => Intent::General,
        }
    }
}

pub struct RequestRouter<'a> {
    generator: &'a dyn TextGenerator,
    warehouse: Option<&'a dyn Warehouse>,
}

impl<'a> RequestRouter<'a> {
    pub fn new(generator: &'a dyn TextGenerator, warehouse: Option<&'a dyn Warehouse>) -> Self {
        Self {
            generator,
            warehouse,
        }
    }

    pub fn classify(&self, message: &str) -> Intent {
        let raw = self.generator.complete(&prompts::classify(message));
        let value = extract_structured(&raw).into_value();
        let intent = match value.get("intent").and_then(|intent| intent.as_str()) {
            Some(label) if label.trim().eq_ignore_ascii_case("requirement") => Intent::Requirement,
            _ => Intent::General,
        };
        tracing::info!(?intent, "intent resolved");
        intent
    }

    pub fn route(&self, message: &str) -> ChatReply {
        match self.classify(message) {
            Intent::Requirement => ChatReply::Requirement(self.normalizer().run(message)),
            Intent::General => {
                let text = self.generator.complete(&prompts::general(message));
                ChatReply::General {
                    answer: GeneralAnswer { text },
                }
            }
        }
    }

    pub fn normalizer(&self) -> RequirementNormalizer<'a> {
        let normalizer = RequirementNormalizer::new(self.generator);
        match self.warehouse {
            Some(warehouse) => normalizer.with_warehouse(warehouse),
            None => normalizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::testing::ScriptedGenerator;
    use crate::lm::PromptKind;
    use crate::warehouse::testing::MemoryWarehouse;
    use serde_json::json;

    #[test]
    fn requirement_intent_runs_normalizer_with_warehouse() {
        let generator = ScriptedGenerator::new()
            .reply(PromptKind::Classify, "```json\n{\"intent\": \"requirement\"}\n```")
            .reply(PromptKind::Normalize, "{\"req_id\": \"REQ-7\"}");
        let warehouse = MemoryWarehouse::default();
        let reply = RequestRouter::new(&generator, Some(&warehouse)).route("The pump shall alarm on occlusion.");

        assert_eq!(reply.intent(), Intent::Requirement);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["intent"], json!("requirement"));
        assert_eq!(value["requirement"]["req_id"], json!("REQ-7"));
        assert_eq!(value["bq_trace"], json!("success"));
        assert_eq!(
            generator.kinds(),
            vec![
                PromptKind::Classify,
                PromptKind::Normalize,
                PromptKind::TestCases,
                PromptKind::IsoAudit
            ]
        );
    }

    #[test]
    fn general_intent_answers_directly() {
        let generator = ScriptedGenerator::new()
            .reply(PromptKind::Classify, "{\"intent\": \"general\"}")
            .reply(PromptKind::General, "ISO 14971 covers risk management.");
        let reply = RequestRouter::new(&generator, None).route("What is ISO 14971?");

        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"intent": "general", "answer": {"text": "ISO 14971 covers risk management."}})
        );
        assert_eq!(
            generator.prompt_for(PromptKind::General).as_deref(),
            Some("What is ISO 14971?")
        );
    }

    #[test]
    fn unparsable_or_failed_classification_is_general() {
        let prose = ScriptedGenerator::new().reply(PromptKind::Classify, "It looks like a requirement.");
        assert_eq!(RequestRouter::new(&prose, None).classify("x"), Intent::General);

        let failed = ScriptedGenerator::new().fail(PromptKind::Classify, "timeout");
        assert_eq!(RequestRouter::new(&failed, None).classify("x"), Intent::General);

        let odd = ScriptedGenerator::new().reply(PromptKind::Classify, "{\"intent\": 1}");
        assert_eq!(RequestRouter::new(&odd, None).classify("x"), Intent::General);
    }
}
