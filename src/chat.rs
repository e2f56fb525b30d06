//! Chatbot over an OpenAI-compatible endpoint
//!
//! Works with any `/chat/completions` API (OpenAI, vLLM, Ollama, ...). When
//! the endpoint is not configured or fails, a canned reply pointing to the
//! contact details is returned with `fallback: true`.

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use validator::Validate;

use crate::config::ChatArgs;
use crate::mail::templates::format_rupees;
use crate::types::{AppError, Result};

/// Longest accepted user message, in characters
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Most recent history turns forwarded to the model
pub const MAX_HISTORY_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Body of `POST /api/chat`
#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 1000, message = "must be 1-1000 characters"))]
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
    pub fallback: bool,
}

/// Catalogue line included in the system prompt
#[derive(Debug, Clone)]
pub struct CourseSummary {
    pub title: String,
    pub price_paise: i64,
    pub duration_days: i32,
    pub session_count: i32,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

struct Endpoint {
    base_url: String,
    api_key: Option<String>,
}

pub struct ChatService {
    client: Client,
    endpoint: Option<Endpoint>,
    model: String,
    school_name: String,
}

impl ChatService {
    pub fn new(args: &ChatArgs, school_name: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(args.chat_timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build chat client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: args.chat_api_url.as_ref().map(|url| Endpoint {
                base_url: url.trim_end_matches('/').to_string(),
                api_key: args.chat_api_key.clone(),
            }),
            model: args.chat_model.clone(),
            school_name: school_name.to_string(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn system_prompt(&self, courses: &[CourseSummary]) -> String {
        let mut prompt = format!(
            "You are the friendly assistant of {school}, a driving school in India. \
             Answer questions about courses, fees, licences (learner's licence and driving test) \
             and booking. Keep answers short. If you do not know something, suggest the contact \
             form. Never invent prices; use only the catalogue below.\n\nCurrent courses:\n",
            school = self.school_name
        );
        if courses.is_empty() {
            prompt.push_str("- (catalogue unavailable)\n");
        }
        for c in courses {
            prompt.push_str(&format!(
                "- {}: {}, {} days, {} sessions\n",
                c.title,
                format_rupees(c.price_paise),
                c.duration_days,
                c.session_count
            ));
        }
        prompt
    }

    fn fallback(&self) -> ChatReply {
        ChatReply {
            reply: format!(
                "Sorry, our assistant is unavailable right now. Please use the contact form \
                 and the {} team will get back to you shortly.",
                self.school_name
            ),
            fallback: true,
        }
    }

    /// Build the message list: system prompt, trimmed history, new message
    fn messages(&self, request: &ChatRequest, courses: &[CourseSummary]) -> Vec<Message> {
        let mut messages = vec![Message {
            role: "system",
            content: self.system_prompt(courses),
        }];

        let skip = request.history.len().saturating_sub(MAX_HISTORY_TURNS);
        for turn in request.history.iter().skip(skip) {
            messages.push(Message {
                role: match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: turn.content.chars().take(MAX_MESSAGE_CHARS).collect(),
            });
        }

        messages.push(Message {
            role: "user",
            content: request.message.chars().take(MAX_MESSAGE_CHARS).collect(),
        });
        messages
    }

    async fn complete(&self, endpoint: &Endpoint, messages: Vec<Message>) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: 400,
            temperature: 0.3,
            stream: false,
        };

        let mut http_request = self
            .client
            .post(format!("{}/chat/completions", endpoint.base_url));
        if let Some(ref key) = endpoint.api_key {
            http_request = http_request.header(header::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = http_request.json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!("Chat endpoint returned {}: {}", status, text)));
        }

        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Gateway("Chat endpoint returned no content".into()))
    }

    /// Answer a visitor message. Never fails; falls back to a canned reply.
    pub async fn reply(&self, request: &ChatRequest, courses: &[CourseSummary]) -> ChatReply {
        let Some(ref endpoint) = self.endpoint else {
            debug!("Chat endpoint not configured, using fallback reply");
            return self.fallback();
        };

        match self.complete(endpoint, self.messages(request, courses)).await {
            Ok(reply) => ChatReply {
                reply,
                fallback: false,
            },
            Err(e) => {
                warn!(error = %e, "Chat completion failed, using fallback reply");
                self.fallback()
            }
        }
    }
}
