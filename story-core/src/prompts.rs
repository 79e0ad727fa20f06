//! Prompt construction for the narrator.
//!
//! Templates are plain text files compiled into the binary; `{name}`
//! placeholders are filled in here.

use crate::backend::ChatMessage;
use crate::preferences::StoryKind;

const NARRATOR_PERSONAL: &str = include_str!("prompts/narrator_personal.txt");
const NARRATOR_GENRE: &str = include_str!("prompts/narrator_genre.txt");
const NARRATOR_CUSTOM: &str = include_str!("prompts/narrator_custom.txt");
const FORMAT_RULES: &str = include_str!("prompts/format_rules.txt");
const FORMAT_EXAMPLE: &str = include_str!("prompts/format_example.txt");
const OPENING_PERSONAL: &str = include_str!("prompts/opening_personal.txt");
const OPENING_GENRE: &str = include_str!("prompts/opening_genre.txt");
const OPENING_CUSTOM: &str = include_str!("prompts/opening_custom.txt");
const CONTINUE_SYSTEM: &str = include_str!("prompts/continue_system.txt");
const CONTINUE_USER: &str = include_str!("prompts/continue_user.txt");
const ENDING_SYSTEM: &str = include_str!("prompts/ending_system.txt");
const ENDING_USER: &str = include_str!("prompts/ending_user.txt");
const TITLE_SYSTEM: &str = include_str!("prompts/title_system.txt");
const TITLE_USER: &str = include_str!("prompts/title_user.txt");

/// What a prompt needs to know about the story being told.
#[derive(Debug, Clone, Copy)]
pub struct StoryFrame<'a> {
    pub kind: StoryKind,
    pub protagonist: &'a str,
    pub genre: Option<&'a str>,
    pub custom_prompt: Option<&'a str>,
}

impl<'a> StoryFrame<'a> {
    fn genre(&self) -> &'a str {
        self.genre.unwrap_or("aventuras")
    }

    fn narrator(&self) -> String {
        match self.kind {
            StoryKind::Personal => fill(NARRATOR_PERSONAL, "protagonist", self.protagonist),
            StoryKind::Genre => fill(NARRATOR_GENRE, "genre", self.genre()),
            StoryKind::Custom => NARRATOR_CUSTOM.trim().to_string(),
        }
    }
}

fn fill(template: &str, name: &str, value: &str) -> String {
    template.trim().replace(&format!("{{{name}}}"), value)
}

/// Messages for the first scene of a story.
pub fn opening(frame: &StoryFrame<'_>) -> Vec<ChatMessage> {
    let system = format!("{}\n{}", frame.narrator(), FORMAT_RULES.trim());
    let user = match frame.kind {
        StoryKind::Personal => fill(OPENING_PERSONAL, "protagonist", frame.protagonist),
        StoryKind::Genre => fill(OPENING_GENRE, "genre", frame.genre()),
        StoryKind::Custom => fill(OPENING_CUSTOM, "idea", frame.custom_prompt.unwrap_or_default()),
    };

    vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("{user}\n\n{}", FORMAT_EXAMPLE.trim())),
    ]
}

/// Messages for the scene following the reader's choice. `preamble` already
/// carries the context and the choice.
pub fn continuation(frame: &StoryFrame<'_>, preamble: &str) -> Vec<ChatMessage> {
    let system = format!(
        "{} {}\n{}",
        frame.narrator(),
        CONTINUE_SYSTEM.trim(),
        FORMAT_RULES.trim()
    );
    let user = format!(
        "{preamble}\n\n{}\n\n{}",
        CONTINUE_USER.trim(),
        FORMAT_EXAMPLE.trim()
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Messages for the closing scene.
pub fn ending(frame: &StoryFrame<'_>, preamble: &str) -> Vec<ChatMessage> {
    let subject = match frame.kind {
        StoryKind::Personal => format!("la historia de {}", frame.protagonist),
        StoryKind::Genre => format!("esta historia de {}", frame.genre()),
        StoryKind::Custom => "esta historia".to_string(),
    };

    vec![
        ChatMessage::system(fill(ENDING_SYSTEM, "subject", &subject)),
        ChatMessage::user(format!("{preamble}\n\n{}", ENDING_USER.trim())),
    ]
}

/// Messages asking for a short title.
pub fn title(story_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(TITLE_SYSTEM.trim()),
        ChatMessage::user(format!("{}\n\n{story_text}", TITLE_USER.trim())),
    ]
}

/// Title used when none can be generated.
pub fn fallback_title(username: &str) -> String {
    format!("La aventura de {username}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatRole;

    fn frame(kind: StoryKind) -> StoryFrame<'static> {
        StoryFrame {
            kind,
            protagonist: "Lucía",
            genre: Some("piratas"),
            custom_prompt: Some("un faro que habla"),
        }
    }

    #[test]
    fn test_opening_mentions_delimiter_and_subject() {
        let personal = opening(&frame(StoryKind::Personal));
        assert_eq!(personal.len(), 2);
        assert_eq!(personal[0].role, ChatRole::System);
        assert!(personal[0].content.contains("Lucía es el protagonista"));
        assert!(personal[0].content.contains("|OPCIONES|"));
        assert!(personal[1].content.contains("1. [Primera opción]"));

        let genre = opening(&frame(StoryKind::Genre));
        assert!(genre[1].content.contains("historia interactiva de piratas"));

        let custom = opening(&frame(StoryKind::Custom));
        assert!(custom[1].content.contains("\"un faro que habla\""));
    }

    #[test]
    fn test_no_placeholder_left_behind() {
        for kind in [StoryKind::Personal, StoryKind::Genre, StoryKind::Custom] {
            let frame = frame(kind);
            let all = opening(&frame)
                .into_iter()
                .chain(continuation(&frame, "Historia actual: \"x\""))
                .chain(ending(&frame, "Historia actual: \"x\""))
                .chain(title("x"));
            for message in all {
                assert!(!message.content.contains('{'), "{}", message.content);
            }
        }
    }

    #[test]
    fn test_continuation_embeds_preamble() {
        let messages = continuation(&frame(StoryKind::Genre), "Historia actual: \"A\"\nElección: \"B\"");
        assert!(messages[1].content.starts_with("Historia actual: \"A\"\nElección: \"B\""));
        assert!(messages[1].content.contains("tres nuevas opciones"));
    }

    #[test]
    fn test_ending_subject() {
        let messages = ending(&frame(StoryKind::Personal), "p");
        assert!(messages[0].content.contains("la historia de Lucía"));
        assert!(messages[1].content.ends_with("Crea un final memorable para la aventura."));
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title("Lucía"), "La aventura de Lucía");
    }
}
