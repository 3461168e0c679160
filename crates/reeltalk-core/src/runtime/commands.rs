//! Chat command handling (/learn, /rate, /help).
//!
//! Commands are parsed into a closed enum and each variant has one handler.
//! Handlers produce the reply; the dispatcher delivers it.

use std::time::Duration;

use tracing::{debug, warn};

use super::prompts::{EXAMPLE_PROMPTS, PromptRegistry};
use crate::channel::SelectablePrompt;
use crate::error::DispatchError;
use crate::knowledge::{KnowledgeClient, Rating, TrainingEntry};

const LEARN_USAGE: &str = "Usage: /learn [Category]: [SubCategory]: [Your Information]\n\nExample: /learn Gear Selection: Fly Fishing: Information about choosing the right fly fishing gear.";
const RATE_USAGE: &str = "Usage: /rate [KB Number] [Helpful/Not Helpful]";

const HELP_TEXT: &str = concat!(
    "**ReelTalkBot Help**\n\n",
    "Welcome to ReelTalkBot! Here's how you can use this bot effectively for your fishing research:\n\n",
    "1. **/learn [Category]: [SubCategory]: [Your Information]**\n",
    "   - Train the bot's Knowledge Base with new information.\n",
    "   - **Example:** `/learn Techniques: Fly Fishing: Information about choosing the right fly fishing gear.`\n\n",
    "2. **/rate [KB Number] [Helpful/Not Helpful]**\n",
    "   - Provide feedback on Knowledge Base articles to help improve accuracy.\n",
    "   - **Example:** `/rate 123 Helpful`\n\n",
    "3. **Effective AI Prompts:**\n",
    "   - Use well-structured prompts to get detailed and accurate responses.\n\n",
    "   **Really Good Prompts:**\n",
    "- \"How do I fish a live shrimp on a free line near mangroves in the Indian River Lagoon. What are some the advantages and disadvantages?\"\n",
    "- \"What are the rules according to DEC for Upper Fly Zone in Altmar. Please list regulations with link to DEC website\"\n",
    "- \"What considerations should I make when choosing nymph size and color when fishing small rivers in the Appalachian Mountains? I will be fishing specifically for rainbow trout\"\n\n",
    "   **Medium Quality Prompts:**\n",
    "- \"How do I freeline a live shrimp for redfish?\"\n",
    "- \"What are some of the regulations for Salmon River in NY?\"\n",
    "- \"What should throw when nymphing for rainbow trout?\"\n\n",
    "   **Poor Prompts:**\n",
    "- \"How do I fish shrimp?\"\n",
    "- \"What are the rules for fishing in NY?\"\n",
    "- \"What nymph color should I pick?\"\n\n",
    "*Click on the buttons below to use these example prompts:*",
);

/// Supported commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Learn { args: String },
    Rate { args: String },
    Help,
    Unknown { name: String },
}

impl Command {
    /// Parse a command name (without the leading `/`). An `@handle` suffix
    /// is ignored and matching is case-insensitive.
    pub fn parse(name: &str, args: &str) -> Self {
        let bare = name.split('@').next().unwrap_or_default().to_lowercase();
        let args = args.trim().to_string();
        match bare.as_str() {
            "learn" => Self::Learn { args },
            "rate" => Self::Rate { args },
            "help" | "start" => Self::Help,
            _ => Self::Unknown { name: bare },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Learn { .. } => "learn",
            Self::Rate { .. } => "rate",
            Self::Help => "help",
            Self::Unknown { name } => name,
        }
    }
}

/// Everything a command handler may touch.
pub struct CommandContext<'a> {
    pub knowledge: Option<&'a dyn KnowledgeClient>,
    pub knowledge_enabled: bool,
    pub prompts: &'a PromptRegistry,
    /// Whether the issuing sender is on the unmetered list.
    pub sender_unmetered: bool,
    pub call_timeout: Duration,
}

/// Reply produced by a command.
#[derive(Debug)]
pub struct CommandReply {
    pub text: String,
    pub prompts: Vec<SelectablePrompt>,
    /// Set when the command was refused; the text already explains why.
    pub rejection: Option<DispatchError>,
}

impl CommandReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompts: Vec::new(),
            rejection: None,
        }
    }

    fn rejected(text: impl Into<String>, reason: DispatchError) -> Self {
        Self {
            text: text.into(),
            prompts: Vec::new(),
            rejection: Some(reason),
        }
    }
}

/// Execute `command`.
pub async fn handle_command(ctx: &CommandContext<'_>, command: Command) -> CommandReply {
    debug!("Handling command: /{}", command.name());

    match command {
        Command::Learn { args } => cmd_learn(ctx, &args).await,
        Command::Rate { args } => cmd_rate(ctx, &args).await,
        Command::Help => cmd_help(ctx),
        Command::Unknown { name } => CommandReply::rejected(
            "Unknown command.",
            DispatchError::MalformedCommand(format!("unknown command /{}", name)),
        ),
    }
}

/// Split `Category: SubCategory: Information`.
pub fn parse_training_data(data: &str) -> Result<TrainingEntry, String> {
    let parts: Vec<&str> = data.splitn(3, ':').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(
            "training data should be in the format 'Category: SubCategory: Information'".into(),
        );
    }
    if parts.iter().any(|part| part.is_empty()) {
        return Err("category, subcategory, and information must be provided".into());
    }
    Ok(TrainingEntry {
        category: parts[0].to_string(),
        sub_category: parts[1].to_string(),
        information: parts[2].to_string(),
    })
}

async fn cmd_learn(ctx: &CommandContext<'_>, args: &str) -> CommandReply {
    let knowledge = match ctx.knowledge {
        Some(client) if ctx.knowledge_enabled => client,
        _ => return CommandReply::text("Knowledge base training is currently disabled."),
    };

    if !ctx.sender_unmetered {
        return CommandReply::rejected(
            "You are not authorized to train the knowledge base.",
            DispatchError::UnauthorizedCommand("learn".into()),
        );
    }

    if args.is_empty() {
        return CommandReply::rejected(
            format!("Please provide the training data.\n{}", LEARN_USAGE),
            DispatchError::MalformedCommand("missing training data".into()),
        );
    }

    let entry = match parse_training_data(args) {
        Ok(entry) => entry,
        Err(reason) => {
            return CommandReply::rejected(
                format!("Invalid training data format: {}\n\n{}", reason, LEARN_USAGE),
                DispatchError::MalformedCommand(reason),
            );
        }
    };

    let result = tokio::time::timeout(ctx.call_timeout, knowledge.train(&entry)).await;
    match result {
        Ok(Ok(())) => CommandReply::text(format!(
            "Training data received and is being processed under category: {}, subcategory: {}.",
            entry.category, entry.sub_category
        )),
        Ok(Err(err)) => {
            warn!(error = %err, "Failed to send training data");
            CommandReply::text(
                "Failed to train the knowledge base. Please ensure your data is correctly formatted.",
            )
        }
        Err(_) => {
            warn!("Training request timed out after {:?}", ctx.call_timeout);
            CommandReply::text(
                "Failed to train the knowledge base. Please ensure your data is correctly formatted.",
            )
        }
    }
}

async fn cmd_rate(ctx: &CommandContext<'_>, args: &str) -> CommandReply {
    if args.is_empty() {
        return CommandReply::rejected(
            format!(
                "Please provide the KB number and your rating.\n{}\n\nExample: /rate 123 Helpful",
                RATE_USAGE
            ),
            DispatchError::MalformedCommand("missing rating".into()),
        );
    }

    let Some((number, rating)) = args.split_once(' ') else {
        return CommandReply::rejected(
            format!("Invalid rating format.\n{}", RATE_USAGE),
            DispatchError::MalformedCommand("rating needs a KB number and a value".into()),
        );
    };

    let Ok(kb_number) = number.parse::<i64>() else {
        return CommandReply::rejected(
            "KB Number must be a valid integer.",
            DispatchError::MalformedCommand(format!("invalid KB number '{}'", number)),
        );
    };

    let Some(rating) = Rating::parse(rating) else {
        return CommandReply::rejected(
            "Rating must be either 'Helpful' or 'Not Helpful'.",
            DispatchError::MalformedCommand(format!("invalid rating '{}'", rating.trim())),
        );
    };

    let Some(knowledge) = ctx.knowledge else {
        return CommandReply::text("Failed to update your rating. Please try again later.");
    };

    match tokio::time::timeout(ctx.call_timeout, knowledge.rate(kb_number, rating)).await {
        Ok(Ok(())) => CommandReply::text("Thank you for your feedback!"),
        Ok(Err(err)) => {
            warn!(error = %err, kb_number, "Failed to update KB entry rating");
            CommandReply::text("Failed to update your rating. Please try again later.")
        }
        Err(_) => {
            warn!(kb_number, "Rating request timed out");
            CommandReply::text("Failed to update your rating. Please try again later.")
        }
    }
}

fn cmd_help(ctx: &CommandContext<'_>) -> CommandReply {
    CommandReply {
        text: HELP_TEXT.to_string(),
        prompts: ctx.prompts.offer(&EXAMPLE_PROMPTS),
        rejection: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockKnowledgeClient;

    fn ctx<'a>(
        knowledge: &'a MockKnowledgeClient,
        prompts: &'a PromptRegistry,
        unmetered: bool,
    ) -> CommandContext<'a> {
        CommandContext {
            knowledge: Some(knowledge),
            knowledge_enabled: true,
            prompts,
            sender_unmetered: unmetered,
            call_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_parse_strips_handle_and_case() {
        assert_eq!(Command::parse("Help@ReelTalkBot", ""), Command::Help);
        assert_eq!(
            Command::parse("learn@ReelTalkBot", " a: b: c "),
            Command::Learn {
                args: "a: b: c".into()
            }
        );
        assert_eq!(
            Command::parse("stats", ""),
            Command::Unknown {
                name: "stats".into()
            }
        );
    }

    #[test]
    fn test_parse_training_data() {
        let entry = parse_training_data("Gear Selection: Fly Fishing: Use 5X tippet: always").unwrap();
        assert_eq!(entry.category, "Gear Selection");
        assert_eq!(entry.sub_category, "Fly Fishing");
        assert_eq!(entry.information, "Use 5X tippet: always");

        assert!(parse_training_data("only: two").is_err());
        assert!(parse_training_data("a: : c").is_err());
    }

    #[tokio::test]
    async fn test_learn_rejected_for_metered_sender() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let reply = handle_command(
            &ctx(&knowledge, &prompts, false),
            Command::parse("learn", "Timing: Spring: runs in April"),
        )
        .await;

        assert_eq!(reply.text, "You are not authorized to train the knowledge base.");
        assert!(matches!(
            reply.rejection,
            Some(DispatchError::UnauthorizedCommand(_))
        ));
        assert_eq!(knowledge.train_calls(), 0);
    }

    #[tokio::test]
    async fn test_learn_disabled_knowledge_base() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let mut context = ctx(&knowledge, &prompts, true);
        context.knowledge_enabled = false;

        let reply = handle_command(&context, Command::parse("learn", "a: b: c")).await;
        assert_eq!(reply.text, "Knowledge base training is currently disabled.");
        assert_eq!(knowledge.train_calls(), 0);
    }

    #[tokio::test]
    async fn test_learn_malformed_makes_no_call() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let reply = handle_command(
            &ctx(&knowledge, &prompts, true),
            Command::parse("learn", "just some text"),
        )
        .await;

        assert!(reply.text.starts_with("Invalid training data format:"));
        assert!(matches!(
            reply.rejection,
            Some(DispatchError::MalformedCommand(_))
        ));
        assert_eq!(knowledge.train_calls(), 0);
    }

    #[tokio::test]
    async fn test_learn_success() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let reply = handle_command(
            &ctx(&knowledge, &prompts, true),
            Command::parse("learn", "Timing: Spring Run: Steelhead peak in April."),
        )
        .await;

        assert_eq!(
            reply.text,
            "Training data received and is being processed under category: Timing, subcategory: Spring Run."
        );
        assert_eq!(knowledge.train_calls(), 1);
    }

    #[tokio::test]
    async fn test_learn_failure_reported() {
        let knowledge = MockKnowledgeClient::new().failing();
        let prompts = PromptRegistry::new();
        let reply = handle_command(
            &ctx(&knowledge, &prompts, true),
            Command::parse("learn", "a: b: c"),
        )
        .await;
        assert!(reply.text.starts_with("Failed to train the knowledge base."));
    }

    #[tokio::test]
    async fn test_rate_validation() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let context = ctx(&knowledge, &prompts, false);

        let reply = handle_command(&context, Command::parse("rate", "abc Helpful")).await;
        assert_eq!(reply.text, "KB Number must be a valid integer.");

        let reply = handle_command(&context, Command::parse("rate", "12 Great")).await;
        assert_eq!(reply.text, "Rating must be either 'Helpful' or 'Not Helpful'.");

        let reply = handle_command(&context, Command::parse("rate", "12")).await;
        assert!(reply.text.starts_with("Invalid rating format."));

        let reply = handle_command(&context, Command::parse("rate", "")).await;
        assert!(reply.text.starts_with("Please provide the KB number"));

        assert_eq!(knowledge.rate_calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_success() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let reply = handle_command(
            &ctx(&knowledge, &prompts, false),
            Command::parse("rate", "123 not helpful"),
        )
        .await;
        assert_eq!(reply.text, "Thank you for your feedback!");
        assert_eq!(knowledge.rate_calls(), 1);
    }

    #[tokio::test]
    async fn test_help_registers_prompts() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let reply = handle_command(&ctx(&knowledge, &prompts, false), Command::Help).await;

        assert!(reply.text.starts_with("**ReelTalkBot Help**"));
        assert_eq!(reply.prompts.len(), 3);
        assert!(prompts.resolve("prompt_3").is_some());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let knowledge = MockKnowledgeClient::new();
        let prompts = PromptRegistry::new();
        let reply = handle_command(
            &ctx(&knowledge, &prompts, false),
            Command::parse("fish", ""),
        )
        .await;
        assert_eq!(reply.text, "Unknown command.");
    }
}
