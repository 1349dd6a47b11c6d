//! Fixed replies for turns that end without a generated answer.

use campus_assistant_core::models::{Language, Scope};

use crate::config::AnswerConfig;

/// Retrieval found nothing usable, or the model found no answer in the sources.
pub fn insufficient_information(language: Language) -> &'static str {
    match language {
        Language::German => {
            "Dazu habe ich in den verfügbaren Inhalten leider keine Informationen gefunden. 🤔 \
             Versuche es gerne mit einer anders formulierten Frage."
        }
        Language::English => {
            "Unfortunately, I could not find any information about this in the available content. 🤔 \
             Feel free to rephrase your question."
        }
    }
}

/// First reply to input that is not a question.
pub fn not_understood(language: Language) -> &'static str {
    match language {
        Language::German => {
            "Entschuldige, ich habe deine Frage nicht ganz verstanden. 🤔 \
             Könntest du dein Problem bitte noch einmal etwas genauer erklären oder anders formulieren?"
        }
        Language::English => {
            "Sorry, I did not quite understand your question. 🤔 \
             Could you explain your problem in more detail or phrase it differently?"
        }
    }
}

/// Reply when the previous answer already was [`not_understood`].
///
/// Inside a course the user is sent to the course page, elsewhere to support.
pub fn not_understood_again(language: Language, scope: &Scope, config: &AnswerConfig) -> String {
    match scope.course_id {
        Some(course_id) => {
            let url = config
                .course_url_template
                .replace("{course_id}", &course_id.to_string());
            match language {
                Language::German => format!(
                    "Es tut mir leid, aber ich konnte die benötigten Informationen im Kurs nicht finden. 📚\n\
                     Schau bitte im Kurs selbst nach:\n{}",
                    url
                ),
                Language::English => format!(
                    "I'm sorry, but I could not find the information you need in the course. 📚\n\
                     Please have a look at the course itself:\n{}",
                    url
                ),
            }
        }
        None => match language {
            Language::German => format!(
                "Entschuldigung, ich habe deine Frage immer noch nicht verstanden. 📩 \
                 Bitte wende dich an unseren Support unter {}.",
                config.support_email
            ),
            Language::English => format!(
                "Sorry, I still did not understand your question. 📩 \
                 Please contact our support at {}.",
                config.support_email
            ),
        },
    }
}

/// Whether `text` is one of the first-level not-understood replies.
pub fn is_not_understood(text: &str) -> bool {
    [Language::German, Language::English]
        .iter()
        .any(|l| text == not_understood(*l))
}

/// An indispensable stage failed.
pub fn cannot_answer(language: Language) -> &'static str {
    match language {
        Language::German => {
            "Entschuldige, bei der Beantwortung deiner Frage ist ein technischer Fehler aufgetreten. \
             Bitte versuche es in ein paar Minuten noch einmal."
        }
        Language::English => {
            "Sorry, a technical problem occurred while answering your question. \
             Please try again in a few minutes."
        }
    }
}
