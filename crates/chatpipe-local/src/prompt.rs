//! System/user prompt composition for a classified turn.

use chatpipe_core::{Classification, ResearchMode, ResearchResult};

pub const CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Keep your responses concise and avoid repeating yourself.";

pub const RESULT_DELIMITER: &str = "\n\n---\n\n";

pub const MISSING_CONTENT_PLACEHOLDER: &str = "No additional content available";

pub const SOCIAL_ANALYSIS_PROMPT: &str = r#"You are an AI assistant performing a comprehensive social media analysis. You MUST structure your response exactly as follows:

## Basic Information
- Name/Entity: [Full name or entity name]
- Type: [Individual/Brand/Organization]
- Primary Focus: [Main area of activity/influence]

## Social Media Presence Overview
[Overall summary of digital footprint and influence]

## Platform-Specific Analysis

### Professional Networks (LinkedIn)
- Profile Overview
- Professional History
- Connections and Influence
- Content Focus
- Engagement Patterns

### Twitter/X
- Handle and Followers
- Post Frequency
- Content Themes
- Engagement Metrics
- Notable Interactions
- Hashtag Usage

### Instagram
- Account Type (Personal/Business)
- Follower Demographics
- Content Style
- Visual Themes
- Story/Reel Usage
- Engagement Patterns

### TikTok
- Account Focus
- Content Style
- Viral Content
- Hashtag Strategy
- Engagement Metrics

### YouTube
- Channel Overview
- Content Categories
- Subscriber Base
- Video Performance
- Engagement Style

### Facebook
- Page/Profile Type
- Content Strategy
- Community Engagement
- Event Participation
- Group Involvement

### Other Platforms
[Analysis of presence on Medium, Substack, GitHub, etc.]

## Content Analysis
- Primary Topics
- Content Style
- Posting Frequency
- Peak Activity Times
- Cross-Platform Strategy

## Engagement Metrics
- Follower Growth
- Engagement Rates
- Platform Performance
- Audience Demographics
- Peak Engagement Times

## Brand Voice & Messaging
- Communication Style
- Key Messages
- Consistency
- Evolution Over Time

## Notable Campaigns/Moments
[Significant social media activities or viral moments]

## Verification & Authenticity
- Verified Accounts
- Cross-Platform Consistency
- Potential Red Flags
- Information Reliability

## Recommendations
[Suggested areas for investigation or notable patterns to watch]

Important:
1. ALWAYS include all sections above
2. Provide specific metrics where available
3. Note platform-specific strengths/weaknesses
4. Include relevant handles and links
5. Highlight verified information
6. Note any data gaps or uncertainties"#;

pub const PERSON_ANALYSIS_PROMPT: &str = r#"You are an AI assistant analyzing search results about a person. You MUST structure your response exactly as follows:

## Identity
- Full Name: [State the person's full name]
- Pronouns: [State the pronouns the sources use for the person, or "not stated"]
- Current Role/Occupation: [List current position(s)]

## Professional Background
[Summarize career history and achievements]

## Social Media Presence
[Detailed analysis of each platform found:

### LinkedIn
- Profile Overview
- Current Position
- Career History
- Notable Connections
- Content Focus

### Twitter/X
- Handle
- Follower Count
- Tweet Focus
- Notable Interactions
- Hashtag Usage

### Instagram
- Account Type
- Content Style
- Engagement Level
- Notable Posts
- Themes

### TikTok
- Content Style
- Following
- Viral Posts
- Key Topics

### Facebook
- Public Presence
- Community Engagement
- Notable Activities

### Other Platforms
(YouTube, Medium, Substack, GitHub, etc.)]

## Notable Information
[Key facts, achievements, or newsworthy items]

## Online Activity Patterns
- Posting Frequency
- Platform Preferences
- Content Themes
- Engagement Style
- Cross-Platform Presence

## Verification Status
[Indicate confidence level in the information:
- Which facts are verified across multiple sources
- Which information needs verification
- Any conflicting information found
- Account verification status on each platform]

Important:
1. ALWAYS include all sections above
2. Only report pronouns the sources actually use; never guess them from a name
3. Cite sources for key claims
4. Note any uncertainty
5. Include all social media handles/links found
6. Highlight verified accounts"#;

pub const WEB_ANALYSIS_PROMPT: &str = r#"You are an AI assistant analyzing web search results. You MUST structure your response exactly as follows:

## Summary
[Provide a clear, concise overview of the key findings]

## Details
[List key information with direct quotes]

## Analysis
[Your interpretation of the findings]

## Gaps
[Note any missing information]

## Recommendations
[Suggest next steps]

Important:
1. ALWAYS include all sections above
2. Use markdown formatting
3. Include quotes from sources
4. Keep it clear and organized"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub system: String,
    pub user: String,
}

pub fn system_prompt_for(mode: ResearchMode) -> &'static str {
    match mode {
        ResearchMode::None => CHAT_SYSTEM_PROMPT,
        ResearchMode::SocialAnalysis => SOCIAL_ANALYSIS_PROMPT,
        ResearchMode::PersonLookup => PERSON_ANALYSIS_PROMPT,
        ResearchMode::Generic => WEB_ANALYSIS_PROMPT,
    }
}

pub fn format_result(r: &ResearchResult) -> String {
    let content = if r.scraped_content.is_empty() {
        MISSING_CONTENT_PLACEHOLDER
    } else {
        r.scraped_content.as_str()
    };
    format!(
        "Source: {}\nURL: {}\nSummary: {}\nContent: {}",
        r.title, r.url, r.snippet, content
    )
}

pub fn compose(c: &Classification, results: &[ResearchResult]) -> ComposedPrompt {
    if c.mode == ResearchMode::None {
        return ComposedPrompt {
            system: CHAT_SYSTEM_PROMPT.to_string(),
            user: c.cleaned_query.clone(),
        };
    }

    let blocks = results
        .iter()
        .map(format_result)
        .collect::<Vec<_>>()
        .join(RESULT_DELIMITER);
    let user = format!(
        "Analyze these search results for: \"{}\"\n\n{}\n\n\
         YOU MUST include all sections as specified in the prompt above.\n\
         The Sources section will be added automatically after your answer; do not write one yourself.",
        c.cleaned_query, blocks
    );
    ComposedPrompt {
        system: system_prompt_for(c.mode).to_string(),
        user,
    }
}
