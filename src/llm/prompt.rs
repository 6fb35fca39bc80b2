use crate::perception::types::ElementRecord;

/// System prompt for the Set-of-Mark decision call.
pub const SYSTEM_PROMPT: &str = r#"You are a browser automation agent working toward a user's task on a web page.

Each turn you receive:
1. The task.
2. A screenshot of the page in which interactive elements are outlined in RED and tagged with a NUMBER.
3. The list of those elements (index, tag, text, aria label, placeholder, geometry).
4. The actions taken so far.

Reply with ONE JSON object:
- "thought": what you see now, what changed since the last step, and what you expect your next action to do.
- "action": one of "click", "type", "press", "scroll", "navigate", "finish", "fail".
- "params":
    click    -> {"element_index": 0, "text": "exact visible text", "selector": "optional css"}
    type     -> {"element_index": 0, "text": "text to type", "selector": "optional css"}
    press    -> {"key": "Enter"}
    scroll   -> {"direction": "down" | "up"}
    navigate -> {"url": "https://..."}
    finish   -> {"summary": "what is now visible that proves the task is done"}
    fail     -> {"reason": "why the task cannot be completed"}

Choosing an element:
- Find the element in the screenshot, read the number on ITS red tag, then check that entry in the element list.
  If the list text does not match what you expect, you misread the number; look again.
- Always put the element's visible text in "text" for clicks. It is used to correct a misread number.
- Tags can overlap in dense menus. Neighbouring items have different numbers.
- When parent and child are both outlined, pick the most specific one (usually the one carrying the text).
- For icons, look for entries with an aria label.

Typing:
- Prefer inputs whose placeholder matches the field you need. Avoid a global search bar unless the task is a search.
- A freshly created item often has its title field already focused (placeholder such as "Untitled" or "Project name").
  In that case send "type" with NO element_index so the text goes to the focused field.

Checking progress:
- After every action, compare the new screenshot with what you expected. If nothing changed, the action failed:
  try a different approach instead of repeating it. Press Escape to dismiss an unexpected menu.
- In tables and lists, click the item's name, not its status icon or an empty part of the row.

Finishing:
- Only "finish" when the result is VISIBLE in the current screenshot (the created item is listed, the filter chip is shown, ...).
  Never finish from memory of earlier steps. If you cannot see proof, keep working or "fail" with an explanation.
"#;

/// The text part of the user message.
pub fn user_text(task: &str, history: &[String], elements: &[ElementRecord]) -> String {
    let history_text = if history.is_empty() {
        "none".to_string()
    } else {
        history
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {h}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let elements_json = serde_json::to_string_pretty(elements).unwrap_or_else(|_| "[]".into());
    format!(
        "Task: {task}\n\nPrevious actions:\n{history_text}\n\nInteractive elements ({}):\n{elements_json}",
        elements.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::BoundingBox;

    #[test]
    fn user_text_lists_history_and_elements() {
        let el = ElementRecord {
            index: 0,
            tag_name: "button".into(),
            text: "Create".into(),
            id: None,
            placeholder: None,
            input_type: None,
            aria_label: None,
            role: None,
            bounding_box: BoundingBox::new(1.0, 2.0, 30.0, 20.0),
        };
        let text = user_text("make a project", &["click on 'New'".into()], &[el]);
        assert!(text.starts_with("Task: make a project"));
        assert!(text.contains("1. click on 'New'"));
        assert!(text.contains("\"tagName\": \"button\""));
        assert!(text.contains("Interactive elements (1)"));
    }

    #[test]
    fn empty_history_says_none() {
        assert!(user_text("t", &[], &[]).contains("Previous actions:\nnone"));
    }
}
