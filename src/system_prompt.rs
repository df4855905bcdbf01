//! System prompt construction for each lab-building stage
//!
//! Every request carries a short stage instruction followed by the lab record
//! gathered so far, so the model never needs earlier stages' history.

use crate::lab::LabRecord;
use crate::state_machine::{RequestMode, Stage};
use crate::tools::TRANSFER_TO_NEXT_STAGE;

/// Role shared by every stage
const BASE_PROMPT: &str = r"You are a Lab Builder assistant. You help an instructor design a hands-on cybersecurity lab: its requirements, a title, a briefing and a multiple-choice quiz.

Be concise and friendly. Call at most one tool per reply. Only move on when the user has confirmed they are happy with the current stage.";

const REQUIREMENTS_PROMPT: &str = r"Current stage: requirements.

Find out the lab's topic, who it is for (the target persona) and how hard it should be on a scale of 1 to 7. Ask for whatever is missing, one question at a time. Once you know all three, call set_lab_requirements and ask the user to confirm.";

const TITLE_PROMPT: &str = r"Current stage: title.

A title has been proposed. Discuss it with the user. If they want a different one, call set_lab_title with the new title and a one-sentence explanation.";

const BRIEFING_PROMPT: &str = r"Current stage: briefing.

The briefing is the scenario text students read before starting the lab. Ask the user for feedback on the current briefing. If they want changes, call set_briefing with the complete revised briefing.";

const BRIEFING_DRAFT_PROMPT: &str = r"Write the briefing for this lab: two or three short paragraphs setting the scene for the student, pitched at the target persona and difficulty. Reply with the briefing text only, no preamble.";

const QUESTIONS_PROMPT: &str = r"Current stage: questions.

Write multiple-choice questions that check the student understood the lab. Create one question per reply with create_question, then ask the user whether they want another.";

const COMPLETE_PROMPT: &str = r"The lab is complete. Summarise what was built and answer any questions the user has about it. You cannot change the lab any more.";

const TITLE_EXTRACTION_PROMPT: &str = r"Propose a short, memorable title for this lab and a one-sentence explanation of why it fits. Call set_lab_title with your proposal.";

/// Build the system prompt for a model request in the given stage
pub fn build_system_prompt(stage: Stage, mode: RequestMode, lab: &LabRecord) -> String {
    let instruction = match (stage, mode) {
        (_, RequestMode::Draft) => BRIEFING_DRAFT_PROMPT,
        (Stage::Requirements, RequestMode::Chat) => REQUIREMENTS_PROMPT,
        (Stage::Title, RequestMode::Chat) => TITLE_PROMPT,
        (Stage::Briefing, RequestMode::Chat) => BRIEFING_PROMPT,
        (Stage::Questions, RequestMode::Chat) => QUESTIONS_PROMPT,
        (Stage::Complete, RequestMode::Chat) => COMPLETE_PROMPT,
    };

    let mut prompt = format!("{BASE_PROMPT}\n\n{instruction}");
    if mode == RequestMode::Chat && !stage.is_terminal() {
        prompt.push_str(&format!(
            "\n\nWhen the user confirms they are done with this stage, call {TRANSFER_TO_NEXT_STAGE}. It only succeeds once {}.",
            stage.precondition()
        ));
    }
    prompt.push_str("\n\n<lab>\n");
    prompt.push_str(&lab.summary());
    prompt.push_str("\n</lab>");
    prompt
}

/// Prompt for the forced title proposal on entering the title stage
pub fn title_extraction_prompt(lab: &LabRecord) -> String {
    format!(
        "{BASE_PROMPT}\n\n{TITLE_EXTRACTION_PROMPT}\n\n<lab>\n{}\n</lab>",
        lab.summary()
    )
}

/// User turn appended to the history for the title extraction request
pub const TITLE_EXTRACTION_INSTRUCTION: &str = "Propose a title for the lab.";

/// Stand-in user turn for a stage whose history was cleared on entry
pub fn stage_entry_message(stage: Stage) -> String {
    format!("Let's work on the {stage} stage.")
}
