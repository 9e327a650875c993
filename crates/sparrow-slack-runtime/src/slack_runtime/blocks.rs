//! Block Kit payloads for the interactive surfaces Sparrow posts.

use serde_json::{json, Value};

pub(super) const ISSUE_PROMPT_TEXT: &str = "Do you want help creating a Jira issue?";

pub(super) fn issue_prompt_blocks() -> Value {
    json!([
        {
            "type": "section",
            "text": { "type": "mrkdwn", "text": ISSUE_PROMPT_TEXT },
        },
        {
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": { "type": "plain_text", "text": "Yes" },
                    "style": "primary",
                    "value": "yes",
                    "action_id": "create_jira_yes",
                },
                {
                    "type": "button",
                    "text": { "type": "plain_text", "text": "No" },
                    "style": "danger",
                    "value": "no",
                    "action_id": "create_jira_no",
                },
            ],
        },
    ])
}

pub(super) fn onboarding_message_blocks() -> Value {
    json!([
        {
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": "*Welcome!* :hatching_chick:\nLearn more about what we do and onboard with us.",
            },
        },
        {
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": { "type": "plain_text", "text": "Start Onboarding" },
                    "action_id": "start_onboarding",
                },
            ],
        },
    ])
}

pub(super) fn onboarding_modal() -> Value {
    json!({
        "type": "modal",
        "callback_id": "onboarding_modal",
        "title": { "type": "plain_text", "text": "Start Onboarding" },
        "submit": { "type": "plain_text", "text": "Submit" },
        "close": { "type": "plain_text", "text": "Cancel" },
        "blocks": [
            {
                "type": "input",
                "block_id": "customer_name_block",
                "label": { "type": "plain_text", "text": "Customer Name" },
                "element": { "type": "plain_text_input", "action_id": "customer_name" },
            },
            {
                "type": "input",
                "block_id": "company_name_block",
                "label": { "type": "plain_text", "text": "Company Name" },
                "element": { "type": "plain_text_input", "action_id": "company_name" },
            },
            {
                "type": "input",
                "block_id": "email_block",
                "label": { "type": "plain_text", "text": "Email" },
                "element": { "type": "plain_text_input", "action_id": "email" },
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::{issue_prompt_blocks, onboarding_modal};

    #[test]
    fn unit_issue_prompt_wires_both_action_ids() {
        let blocks = issue_prompt_blocks();
        let elements = blocks[1]["elements"].as_array().expect("elements");
        let ids = elements
            .iter()
            .filter_map(|element| element["action_id"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["create_jira_yes", "create_jira_no"]);
    }

    #[test]
    fn unit_onboarding_modal_uses_expected_callback() {
        let modal = onboarding_modal();
        assert_eq!(modal["callback_id"], "onboarding_modal");
        assert_eq!(modal["blocks"].as_array().map(Vec::len), Some(3));
    }
}
