use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `IssueType` values.
pub enum IssueType {
    NewFeature,
    Bug,
    Improvement,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::NewFeature => "new_feature",
            IssueType::Bug => "bug",
            IssueType::Improvement => "improvement",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Issue-tracker ticket extracted from a thread transcript.
pub struct IssueTicket {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub summary: String,
    pub description: String,
    #[serde(default)]
    pub action_items: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TicketBatch {
    pub tickets: Vec<IssueTicket>,
}

pub(crate) const TICKET_SHAPE_HINT: &str = "{\"tickets\": [{\"type\": \"new_feature\" | \
\"bug\" | \"improvement\", \"summary\": string, \"description\": string, \
\"action_items\": [string]}]}";

#[cfg(test)]
mod tests {
    use super::{IssueTicket, IssueType, TicketBatch};

    #[test]
    fn unit_ticket_round_trips_with_type_alias_field() {
        let raw = "{\"tickets\":[{\"type\":\"bug\",\"summary\":\"login broken\",\
                   \"description\":\"crashes on submit\",\"action_items\":[\"add repro\"]}]}";
        let batch: TicketBatch = serde_json::from_str(raw).expect("parse");
        assert_eq!(batch.tickets.len(), 1);
        assert_eq!(batch.tickets[0].issue_type, IssueType::Bug);

        let rendered = serde_json::to_string(&batch.tickets[0]).expect("serialize");
        assert!(rendered.contains("\"type\":\"bug\""));
    }

    #[test]
    fn unit_action_items_default_to_empty() {
        let raw = "{\"type\":\"improvement\",\"summary\":\"s\",\"description\":\"d\"}";
        let ticket: IssueTicket = serde_json::from_str(raw).expect("parse");
        assert!(ticket.action_items.is_empty());
    }
}
