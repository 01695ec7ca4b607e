//! Prompt construction for the generation call.
//!
//! The prompt is assembled from the user's profile, their recent reactions,
//! the time of day, the requested mode and how varied their recent topics are.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::llm_client::prompts::{user_instruction, JSON_ARRAY_ONLY, OUTPUT_SHAPE, QUALITY_RULES};
use crate::llm_client::{ChatMessage, ChatOptions, ChatRequest};
use crate::models::content::ContentStyle;
use crate::models::user::{InteractionKind, InteractionRecord, UserProfile};

pub const BASE_TEMPERATURE: f64 = 0.7;
pub const MAX_HASHTAGS: usize = 10;
pub const MAX_TOPIC_HINTS: usize = 5;
const TOP_P: f64 = 0.9;
const REPEAT_PENALTY: f64 = 1.1;
const TOKENS_PER_POST: u32 = 270;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Default,
    Creative,
    Focused,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Creative => "creative",
            Self::Focused => "focused",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Default => "Balanced: mix useful information with light entertainment and keep it natural.",
            Self::Creative => "Creative: favour fresh angles, humour and unusual connections between ideas.",
            Self::Focused => "Focused: stay on the core interests and go deep, professional and structured.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Morning,
            12..=16 => Self::Afternoon,
            17..=21 => Self::Evening,
            _ => Self::Night,
        }
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self::from_hour(now.hour())
    }

    fn context(&self) -> &'static str {
        match self {
            Self::Morning => "Morning: motivating, learning-oriented, thought-starting content fits best.",
            Self::Afternoon => "Afternoon: relaxed, shareable, reflective content fits best.",
            Self::Evening => "Evening: nostalgic, connecting, community-minded content fits best.",
            Self::Night => "Night: introspective, exploratory, quiet content fits best.",
        }
    }
}

/// Everything the builder needs about one request.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub profile: &'a UserProfile,
    pub recent: &'a [InteractionRecord],
    pub time_of_day: TimeOfDay,
    pub mode: GenerationMode,
    pub diversity_score: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
    pub temperature: f64,
    pub count: usize,
    pub hashtags: Vec<String>,
}

impl GenerationPrompt {
    pub fn to_chat_request(&self, model: &str) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage::system(self.system.clone()),
                ChatMessage::user(self.user.clone()),
            ],
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                top_p: TOP_P,
                num_predict: TOKENS_PER_POST * self.count.max(1) as u32,
                repeat_penalty: REPEAT_PENALTY,
            },
        }
    }
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> GenerationPrompt {
    let hashtags = build_hashtags(&ctx.profile.interests);
    let liked = liked_topics(ctx.recent);
    let disliked = disliked_topics(ctx.recent);

    let interests = if ctx.profile.interests.is_empty() {
        "none selected yet".to_string()
    } else {
        ctx.profile.interests.join(", ")
    };
    let emphasized = if liked.is_empty() {
        "no clear preference yet, explore freely".to_string()
    } else {
        liked.join(", ")
    };
    let avoided = if disliked.is_empty() {
        "no restrictions".to_string()
    } else {
        disliked.join(", ")
    };
    let tone = match ctx.profile.style {
        ContentStyle::Formal => "formal and professional",
        ContentStyle::Casual => "relaxed and natural",
    };

    let system = format!(
        "You are a content creator who writes personalised short posts.\n\
         \n\
         ## Reader profile\n\
         Interests: {interests}\n\
         Style: {style}\n\
         Language: {language} (write every post in this language)\n\
         \n\
         ## Reaction history\n\
         Emphasise: {emphasized}\n\
         Avoid: {avoided}\n\
         \n\
         ## Context\n\
         {time}\n\
         \n\
         ## Guidelines\n\
         {diversity}\n\
         {mode}\n\
         \n\
         ## Format\n\
         - Threads-style short posts, each under 280 characters.\n\
         - 2-3 relevant hashtags per post (suggested: {hashtags}).\n\
         - 1-3 fitting emoji per post.\n\
         - Tone: {tone}.\n\
         \n\
         ## Quality\n\
         {quality}\n\
         \n\
         ## Output\n\
         {json_only}\n\
         {shape}",
        style = ctx.profile.style.as_str(),
        language = ctx.profile.language,
        time = ctx.time_of_day.context(),
        diversity = diversity_instruction(ctx.diversity_score),
        mode = ctx.mode.instruction(),
        hashtags = hashtags.join(", "),
        quality = QUALITY_RULES,
        json_only = JSON_ARRAY_ONLY,
        shape = OUTPUT_SHAPE,
    );

    GenerationPrompt {
        system,
        user: user_instruction(ctx.count),
        temperature: calculate_temperature(ctx.mode, ctx.diversity_score),
        count: ctx.count,
        hashtags,
    }
}

/// Low diversity warms the sampler up, high diversity cools it down.
pub fn calculate_temperature(mode: GenerationMode, diversity_score: f64) -> f64 {
    let mut temperature = match mode {
        GenerationMode::Default => BASE_TEMPERATURE,
        GenerationMode::Creative => 0.9,
        GenerationMode::Focused => 0.6,
    };
    if diversity_score < 0.4 {
        temperature = (temperature + 0.1).min(1.0);
    }
    if diversity_score > 0.7 {
        temperature = (temperature - 0.1).max(0.5);
    }
    (temperature * 10.0).round() / 10.0
}

fn diversity_instruction(score: f64) -> &'static str {
    if score < 0.3 {
        "Recent reading has been narrow: bring in new topics and viewpoints to widen it."
    } else if score > 0.8 {
        "The reader enjoys many topics: go deeper and more expert on the core interests."
    } else {
        "Balance familiar interests with some fresh exploration without drifting off-topic."
    }
}

/// Hashtags for the reader's interests, known interests mapped to curated tags.
pub fn build_hashtags(interests: &[String]) -> Vec<String> {
    interests
        .iter()
        .flat_map(|interest| match known_hashtags(&interest.to_lowercase()) {
            Some(tags) => tags.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            None => vec![format!("#{}", interest.replace(' ', ""))],
        })
        .take(MAX_HASHTAGS)
        .collect()
}

fn known_hashtags(interest: &str) -> Option<&'static [&'static str]> {
    let tags: &'static [&'static str] = match interest {
        "ai" => &["#AI", "#MachineLearning"],
        "tech" => &["#Tech", "#Programming"],
        "learning" => &["#Learning", "#Growth"],
        "business" => &["#Startups", "#Business"],
        "health" => &["#Health", "#Wellbeing"],
        "travel" => &["#Travel", "#Culture"],
        "food" => &["#Food", "#FoodCulture"],
        "music" => &["#Music", "#Melody"],
        "movies" => &["#Movies", "#Storytelling"],
        "anime" => &["#Anime", "#Otaku"],
        "sports" => &["#Sports", "#Fitness"],
        "games" => &["#Gaming", "#Esports"],
        "design" => &["#Design", "#Visual"],
        "science" => &["#Science", "#Research"],
        "fashion" => &["#Fashion", "#Style"],
        _ => return None,
    };
    Some(tags)
}

pub fn liked_topics(recent: &[InteractionRecord]) -> Vec<String> {
    topics_for(recent, InteractionKind::Like)
}

pub fn disliked_topics(recent: &[InteractionRecord]) -> Vec<String> {
    topics_for(recent, InteractionKind::Dislike)
}

/// Distinct topics from the newest matching interactions first.
fn topics_for(recent: &[InteractionRecord], kind: InteractionKind) -> Vec<String> {
    let mut topics: Vec<String> = Vec::new();
    for record in recent.iter().rev().filter(|r| r.action == kind) {
        for topic in &record.topics {
            let topic = topic.trim();
            if !topic.is_empty() && !topics.iter().any(|t| t == topic) {
                topics.push(topic.to_string());
            }
        }
    }
    topics.truncate(MAX_TOPIC_HINTS);
    topics
}
