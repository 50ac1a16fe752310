/// Salutation used when the customer's name is unknown.
pub const GENERIC_SALUTATION: &str = "there";
pub const ESCALATION_NOTICE: &str = "Your issue has been escalated to our support team.";
pub const CLOSING: &str = "Thank you for your patience.";

/// Drafts the customer reply for the CREATE stage.
///
/// The reply carries the knowledge answer only when the ticket was auto-solved and an
/// answer exists; in every other case it carries the escalation notice instead.
pub fn draft_reply(name: Option<&str>, can_auto_solve: bool, kb_answer: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|name| !name.is_empty()).unwrap_or(GENERIC_SALUTATION);

    match (can_auto_solve, kb_answer) {
        (true, Some(answer)) => format!("Hello {name},\n{answer}\n{CLOSING}"),
        _ => format!("Hello {name},\n{ESCALATION_NOTICE}"),
    }
}
