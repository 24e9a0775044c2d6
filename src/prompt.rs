use crate::web::models::{Message, Role, Source};

/// Stop sequence handed to the model. It closes the trailing instruction block.
pub const STOP_SEQUENCE: &str = "</assistant>";

pub const CONTEXT_HEADER: &str = "Related documents:";

const INSTRUCTION: &str = "Answer the question using the conversation above. \
If related documents are provided, draw on their content but do not cite or name the sources. \
Only provide information you are confident is accurate.";

/// Renders the conversation and retrieved sources into a single prompt.
///
/// When there are sources, the last user message gets a numbered context
/// section appended inside its own tag. All other messages are rendered
/// unchanged, and the prompt always ends with an open `<assistant>` block
/// holding the instruction.
pub fn format_prompt(messages: &[Message], sources: &[Source]) -> String {
    let augmented = if sources.is_empty() {
        None
    } else {
        messages.iter().rposition(|m| m.role == Role::User)
    };

    let mut prompt = String::from("<conversation>\n");
    for (i, message) in messages.iter().enumerate() {
        match message.role {
            Role::User if Some(i) == augmented => {
                prompt.push_str("<human>");
                prompt.push_str(&message.content);
                prompt.push_str(&context_section(sources));
                prompt.push_str("</human>\n");
            }
            Role::User => {
                prompt.push_str(&format!("<human>{}</human>\n", message.content));
            }
            Role::Assistant => {
                prompt.push_str(&format!("<assistant>{}</assistant>\n", message.content));
            }
        }
    }

    prompt.push_str("<assistant>");
    prompt.push_str(INSTRUCTION);
    prompt
}

fn context_section(sources: &[Source]) -> String {
    let mut context = format!("\n\n{}\n", CONTEXT_HEADER);
    for (i, source) in sources.iter().enumerate() {
        context.push_str(&format!("{}. {}\n{}\n\n", i + 1, source.title, source.content));
    }
    context
}
