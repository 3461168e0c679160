//! Registry of canned prompts offered as selectable options.

use dashmap::DashMap;

use crate::channel::SelectablePrompt;

/// A canned prompt with the label shown on its button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CannedPrompt {
    pub token: &'static str,
    pub label: &'static str,
    pub prompt: &'static str,
}

impl CannedPrompt {
    pub fn as_selectable(&self) -> SelectablePrompt {
        SelectablePrompt::new(self.label, self.token)
    }
}

/// Example prompts offered under the help message.
pub const EXAMPLE_PROMPTS: [CannedPrompt; 3] = [
    CannedPrompt {
        token: "prompt_1",
        label: "Excellent Prompt - How do I fish free lined shrimp in the Indian River Lagoon",
        prompt: "How do I fish a live shrimp on a free line near mangroves in the Indian River Lagoon. What are some the advantages and disadvantages?",
    },
    CannedPrompt {
        token: "prompt_2",
        label: "Excellent Prompt - Give me regulations for Altmar fly fishing area on the Salmon River",
        prompt: "What are the rules according to DEC for Upper Fly Zone in Altmar. Please list regulations with link to DEC website",
    },
    CannedPrompt {
        token: "prompt_3",
        label: "Excellent Prompt - What size and color nymph should I use for rainbow trout in Applachian Mountains",
        prompt: "What considerations should I make when choosing nymph size and color when fishing small rivers in the Appalachian Mountains? I will be fishing specifically for rainbow trout",
    },
];

/// Token → prompt mapping shared by every turn.
///
/// Inserts from concurrent help invocations never remove other tokens; a
/// re-registered token is overwritten in place.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    prompts: DashMap<String, String>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, prompt: impl Into<String>) {
        self.prompts.insert(token.into(), prompt.into());
    }

    /// Register a batch of canned prompts and return their buttons.
    pub fn offer(&self, prompts: &[CannedPrompt]) -> Vec<SelectablePrompt> {
        prompts
            .iter()
            .map(|canned| {
                self.register(canned.token, canned.prompt);
                canned.as_selectable()
            })
            .collect()
    }

    /// Prompt for `token`; unknown tokens resolve to `None`.
    pub fn resolve(&self, token: &str) -> Option<String> {
        self.prompts.get(token).map(|prompt| prompt.value().clone())
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}
