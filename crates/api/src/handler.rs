//! Update handling: turn an admitted messaging update into domain actions.

use async_trait::async_trait;

use atelier_core::error::CoreError;
use atelier_db::repositories::UserRepo;
use atelier_db::DbPool;
use std::sync::Arc;

use crate::admission::InboundUpdate;
use crate::coordinator::JobCoordinator;
use crate::error::as_transient;
use crate::notifier::Notifier;

/// Processes one deduplicated update. Implemented by the production handler
/// and by test doubles in the admission tests.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: &InboundUpdate) -> Result<(), CoreError>;
}

/// Production handler: parses user commands out of messaging updates and
/// drives the job coordinator.
pub struct GenerationHandler {
    pool: DbPool,
    coordinator: Arc<JobCoordinator>,
    notifier: Arc<Notifier>,
}

/// A user command parsed from a message text.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Generate { model_id: &'a str, prompt: &'a str },
    Balance,
    Start,
}

impl GenerationHandler {
    pub fn new(pool: DbPool, coordinator: Arc<JobCoordinator>, notifier: Arc<Notifier>) -> Self {
        Self {
            pool,
            coordinator,
            notifier,
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.notifier.send_message(chat_id, text).await {
            tracing::warn!(chat_id, error = %e, "Failed to send reply");
        }
    }
}

#[async_trait]
impl UpdateHandler for GenerationHandler {
    async fn handle(&self, update: &InboundUpdate) -> Result<(), CoreError> {
        // Updates without a text message (edits, stickers, joins) are not
        // commands; acknowledge by doing nothing.
        let Some((chat_id, text)) = extract_message(&update.payload) else {
            tracing::debug!(update_id = update.update_id, "Update carries no text message");
            return Ok(());
        };

        let user = UserRepo::get_or_create(&self.pool, chat_id)
            .await
            .map_err(as_transient)?;

        match parse_command(text) {
            Some(Command::Generate { model_id, prompt }) => {
                match self.coordinator.submit(&user, model_id, prompt).await {
                    Ok(job) => {
                        self.reply(chat_id, &format!("Generation #{} queued.", job.id))
                            .await;
                        Ok(())
                    }
                    Err(CoreError::InsufficientFunds { .. }) => {
                        self.reply(chat_id, "Insufficient balance for a generation.")
                            .await;
                        Ok(())
                    }
                    Err(CoreError::Validation(reason)) => {
                        self.reply(chat_id, &format!("Invalid request: {reason}")).await;
                        Ok(())
                    }
                    Err(err) => {
                        self.reply(chat_id, "Generation could not be started, please try again.")
                            .await;
                        Err(err)
                    }
                }
            }
            Some(Command::Balance) => {
                let balance = UserRepo::balance(&self.pool, user.id)
                    .await
                    .map_err(as_transient)?
                    .unwrap_or_default();
                self.reply(chat_id, &format!("Your balance: {balance} credits."))
                    .await;
                Ok(())
            }
            Some(Command::Start) => {
                self.reply(
                    chat_id,
                    "Commands:\n/gen <model> <prompt> - run a generation\n/balance - show your balance",
                )
                .await;
                Ok(())
            }
            None => {
                tracing::debug!(update_id = update.update_id, "Message is not a command");
                Ok(())
            }
        }
    }
}

/// Pull the chat id and message text out of an update payload.
fn extract_message(payload: &serde_json::Value) -> Option<(i64, &str)> {
    let message = payload.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let text = message.get("text")?.as_str()?;
    Some((chat_id, text))
}

/// Parse a command from message text. `/gen` takes the model id as the
/// first word and the rest of the line as the prompt.
fn parse_command(text: &str) -> Option<Command<'_>> {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix("/gen ") {
        let rest = rest.trim_start();
        let (model_id, prompt) = rest.split_once(char::is_whitespace)?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return None;
        }
        return Some(Command::Generate { model_id, prompt });
    }
    match text {
        "/balance" => Some(Command::Balance),
        "/start" | "/help" => Some(Command::Start),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_generate_command() {
        let cmd = parse_command("/gen flux-dev a red fox in the snow").unwrap();
        assert_eq!(
            cmd,
            Command::Generate {
                model_id: "flux-dev",
                prompt: "a red fox in the snow",
            }
        );
    }

    #[test]
    fn generate_without_prompt_is_rejected() {
        assert!(parse_command("/gen flux-dev").is_none());
        assert!(parse_command("/gen flux-dev   ").is_none());
    }

    #[test]
    fn parses_balance_and_start() {
        assert_eq!(parse_command("/balance"), Some(Command::Balance));
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/help"), Some(Command::Start));
        assert_eq!(parse_command("hello there"), None);
    }

    #[test]
    fn extracts_chat_and_text_from_update() {
        let payload = json!({
            "update_id": 42,
            "message": {"chat": {"id": 777}, "text": "/balance"}
        });
        assert_eq!(extract_message(&payload), Some((777, "/balance")));
    }

    #[test]
    fn non_message_updates_extract_nothing() {
        let payload = json!({"update_id": 43, "edited_message": {"chat": {"id": 1}}});
        assert_eq!(extract_message(&payload), None);
    }
}
