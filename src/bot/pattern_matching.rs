use log::debug;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Default cap on how much of a message is evaluated
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 4000;

/// Compiled program size cap for a single rule
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Code points that render as nothing (or as blank filler) in most clients
const INVISIBLE_CHARS: &[char] = &[
    '\u{00AD}', '\u{034F}', '\u{061C}', '\u{115F}', '\u{1160}', '\u{180E}',
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{200E}', '\u{200F}',
    '\u{2060}', '\u{2061}', '\u{2062}', '\u{2063}', '\u{2064}',
    '\u{3164}', '\u{FEFF}', '\u{FFA0}',
];

#[derive(Debug, Error)]
pub enum InvalidRuleError {
    #[error("rule id cannot be empty")]
    EmptyId,

    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),

    #[error("rule '{id}' has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{id}' has an empty phrase list")]
    EmptyPhraseList { id: String },

    #[error("rule '{id}' needs a run length of at least 2")]
    InvalidRunLength { id: String },

    #[error("rule '{id}' needs a word count of at least 1")]
    InvalidWordCount { id: String },
}

/// Broad class of a rule, reported alongside the match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Spam,
    Invite,
    Mention,
    Policy,
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuleCategory::Spam => "spam",
            RuleCategory::Invite => "invite",
            RuleCategory::Mention => "mention",
            RuleCategory::Policy => "policy",
        };
        f.write_str(name)
    }
}

/// Uncompiled rule as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub category: RuleCategory,
    pub matcher: MatcherDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherDefinition {
    /// Arbitrary regular expression, unanchored unless the pattern anchors itself
    Regex {
        pattern: String,
        #[serde(default)]
        case_insensitive: bool,
    },
    /// Case-insensitive phrase list, matched on word boundaries
    Phrases { phrases: Vec<String> },
    /// The same non-whitespace character repeated at least `min_run` times in a row
    RepeatedRun { min_run: usize },
    /// Zero-width and filler characters
    Invisible,
    /// At least `count` alphanumeric words
    MinWords { count: usize },
}

#[derive(Debug, Clone)]
enum Matcher {
    Regex(Regex),
    RepeatedRun(usize),
    Invisible,
    MinWords(usize),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Regex(regex) => regex.is_match(text),
            Matcher::RepeatedRun(min_run) => has_repeated_run(text, *min_run),
            Matcher::Invisible => text.chars().any(|c| INVISIBLE_CHARS.contains(&c)),
            Matcher::MinWords(count) => {
                text.split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                    .count()
                    >= *count
            }
        }
    }
}

fn has_repeated_run(text: &str, min_run: usize) -> bool {
    let mut prev = None;
    let mut run = 0;

    for ch in text.chars() {
        if ch.is_whitespace() {
            prev = None;
            run = 0;
            continue;
        }
        if prev == Some(ch) {
            run += 1;
        } else {
            prev = Some(ch);
            run = 1;
        }
        if run >= min_run {
            return true;
        }
    }
    false
}

fn compile_regex(
    id: &str,
    pattern: &str,
    case_insensitive: bool,
) -> Result<Regex, InvalidRuleError> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|source| InvalidRuleError::InvalidPattern { id: id.to_string(), source })
}

/// Turn a phrase list into one alternation; inner whitespace matches any whitespace run
fn phrases_to_pattern(phrases: &[String]) -> Option<String> {
    let alternatives: Vec<String> = phrases
        .iter()
        .filter_map(|phrase| {
            let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
            if words.is_empty() {
                return None;
            }
            let body = words.join(r"\s+");
            let starts_word = phrase.trim_start().starts_with(char::is_alphanumeric);
            let ends_word = phrase.trim_end().ends_with(char::is_alphanumeric);
            Some(format!(
                "{}{}{}",
                if starts_word { r"\b" } else { "" },
                body,
                if ends_word { r"\b" } else { "" }
            ))
        })
        .collect();

    if alternatives.is_empty() {
        None
    } else {
        Some(format!("(?:{})", alternatives.join("|")))
    }
}

/// A compiled, immutable moderation rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: RuleCategory,
    matcher: Matcher,
}

impl Rule {
    pub fn compile(definition: &RuleDefinition) -> Result<Self, InvalidRuleError> {
        let id = definition.id.trim();
        if id.is_empty() {
            return Err(InvalidRuleError::EmptyId);
        }

        let matcher = match &definition.matcher {
            MatcherDefinition::Regex { pattern, case_insensitive } => {
                Matcher::Regex(compile_regex(id, pattern, *case_insensitive)?)
            }
            MatcherDefinition::Phrases { phrases } => {
                let pattern = phrases_to_pattern(phrases)
                    .ok_or_else(|| InvalidRuleError::EmptyPhraseList { id: id.to_string() })?;
                Matcher::Regex(compile_regex(id, &pattern, true)?)
            }
            MatcherDefinition::RepeatedRun { min_run } => {
                if *min_run < 2 {
                    return Err(InvalidRuleError::InvalidRunLength { id: id.to_string() });
                }
                Matcher::RepeatedRun(*min_run)
            }
            MatcherDefinition::Invisible => Matcher::Invisible,
            MatcherDefinition::MinWords { count } => {
                if *count == 0 {
                    return Err(InvalidRuleError::InvalidWordCount { id: id.to_string() });
                }
                Matcher::MinWords(*count)
            }
        };

        Ok(Self {
            id: id.to_string(),
            category: definition.category,
            matcher,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.matcher.matches(text)
    }
}

/// Ordered rule list; the first rule that accepts a message is the one reported.
///
/// Evaluation only looks at the first `max_content_length` characters, and every regex
/// runs on a linear-time engine, so matching is bounded for any input.
#[derive(Debug, Clone)]
pub struct PatternSet {
    rules: Vec<Rule>,
    max_content_length: usize,
}

impl PatternSet {
    /// Compile definitions in order. Any malformed definition rejects the whole set.
    pub fn compile(
        definitions: &[RuleDefinition],
        max_content_length: usize,
    ) -> Result<Self, InvalidRuleError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let rule = Rule::compile(definition)?;
            if !seen.insert(rule.id.clone()) {
                return Err(InvalidRuleError::DuplicateId(rule.id));
            }
            rules.push(rule);
        }

        Ok(Self {
            rules,
            max_content_length: max_content_length.max(1),
        })
    }

    /// Built-in rule set with the given banned phrases appended
    pub fn with_defaults(banned_phrases: &[String]) -> Result<Self, InvalidRuleError> {
        Self::compile(&default_rules(banned_phrases), DEFAULT_MAX_CONTENT_LENGTH)
    }

    /// First rule in precedence order that accepts `content`
    pub fn find_match(&self, content: &str) -> Option<&Rule> {
        let text = self.bounded(content);
        let rule = self.rules.iter().find(|rule| rule.matches(text));
        if let Some(rule) = rule {
            debug!("Rule '{}' ({}) matched message content", rule.id, rule.category);
        }
        rule
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn bounded<'a>(&self, content: &'a str) -> &'a str {
        match content.char_indices().nth(self.max_content_length) {
            Some((idx, _)) => &content[..idx],
            None => content,
        }
    }
}

fn regex_rule(
    id: &str,
    category: RuleCategory,
    pattern: &str,
    case_insensitive: bool,
) -> RuleDefinition {
    RuleDefinition {
        id: id.to_string(),
        category,
        matcher: MatcherDefinition::Regex {
            pattern: pattern.to_string(),
            case_insensitive,
        },
    }
}

/// Built-in rules in precedence order. Links come first so that any message carrying a
/// URL is reported as a link regardless of what else it contains.
pub fn default_rules(banned_phrases: &[String]) -> Vec<RuleDefinition> {
    let mut rules = vec![
        regex_rule("url", RuleCategory::Spam, r"\b(?:https?|wss?)://\S+", true),
        regex_rule(
            "invite",
            RuleCategory::Invite,
            concat!(
                r"\bdis(?:cord)?(?:app|merch|status)?",
                r"\.(?:com|g(?:d|g|ift)|de(?:sign|v)|media|new|store|net)\b",
            ),
            true,
        ),
        regex_rule("channel_mention", RuleCategory::Mention, r"^\s*<#\d{17,20}>\s*$", false),
        regex_rule("role_mention", RuleCategory::Mention, r"^\s*<@&\d{17,20}>\s*$", false),
        regex_rule("user_mention", RuleCategory::Mention, r"^\s*<@!?\d{17,20}>\s*$", false),
        regex_rule(
            "alphabet_spam",
            RuleCategory::Spam,
            concat!(
                r"[a4]?\s*[b8]+\s*c+\s*d+\s*[e3]?\s*f+\s*[g9]+\s*h+\s*[i1l]?\s*j+\s*k+\s*[l1i]+\s*",
                r"(?:m|nn|rn)+\s*n+\s*[o0]?\s*p+\s*q+\s*r+\s*[s5]+\s*[t7]+\s*[uv]?\s*v+\s*",
                r"(?:w|vv|uu)+\s*x+\s*y+\s*z+\s*0+\s*9+\s*8+\s*7+\s*6+\s*5+\s*4+\s*3+\s*2+\s*1+",
            ),
            true,
        ),
        RuleDefinition {
            id: "repeated_chars".to_string(),
            category: RuleCategory::Spam,
            matcher: MatcherDefinition::RepeatedRun { min_run: 10 },
        },
        RuleDefinition {
            id: "invisible_chars".to_string(),
            category: RuleCategory::Policy,
            matcher: MatcherDefinition::Invisible,
        },
    ];

    if banned_phrases.iter().any(|p| !p.trim().is_empty()) {
        rules.push(RuleDefinition {
            id: "banned_phrases".to_string(),
            category: RuleCategory::Policy,
            matcher: MatcherDefinition::Phrases {
                phrases: banned_phrases.to_vec(),
            },
        });
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> PatternSet {
        PatternSet::with_defaults(&["free nitro".to_string(), "steam gift".to_string()]).unwrap()
    }

    #[test]
    fn test_safe_text_is_clean() {
        let set = defaults();

        for content in [
            "hello there, how is everyone doing?",
            "gg",
            "I think the patch notes are out tomorrow",
            "see you at 9pm!",
            "<@123> not a full snowflake",
            "",
        ] {
            assert!(set.find_match(content).is_none(), "unexpected match for {:?}", content);
        }
    }

    #[test]
    fn test_url_rule_takes_precedence() {
        let set = defaults();

        let rule = set.find_match("check this out http://example.com").unwrap();
        assert_eq!(rule.id, "url");
        assert_eq!(rule.category, RuleCategory::Spam);

        // Also matches the invite and repeated-character rules, but the URL rule comes first
        let rule = set.find_match("HTTPS://discord.gg/abc !!!!!!!!!!!!").unwrap();
        assert_eq!(rule.id, "url");

        let rule = set.find_match("wss://gateway.example.net/socket").unwrap();
        assert_eq!(rule.id, "url");
    }

    #[test]
    fn test_invite_shapes() {
        let set = defaults();

        assert_eq!(set.find_match("join discord.gg/abcdef").unwrap().id, "invite");
        assert_eq!(set.find_match("claim at Discord.Gift/xyz").unwrap().id, "invite");
        assert_eq!(set.find_match("discordapp.com/invite/x").unwrap().id, "invite");
        assert!(set.find_match("this.community is nice").is_none());
    }

    #[test]
    fn test_mentions_only_when_whole_message() {
        let set = defaults();

        assert_eq!(set.find_match("<#123456789012345678>").unwrap().id, "channel_mention");
        assert_eq!(set.find_match("<@&123456789012345678>").unwrap().id, "role_mention");
        assert_eq!(set.find_match("<@!123456789012345678>").unwrap().id, "user_mention");
        assert_eq!(set.find_match(" <@123456789012345678> ").unwrap().id, "user_mention");
        assert!(set.find_match("thanks <@123456789012345678> for the help").is_none());
    }

    #[test]
    fn test_alphabet_spam() {
        let set = defaults();

        for spam in [
            "abcdefghijklmnopqrstuvwxyz0987654321",
            "4bcd3fghijklmnopqr5tuvwxyz 0987654321",
        ] {
            assert_eq!(set.find_match(spam).unwrap().id, "alphabet_spam");
        }
    }

    #[test]
    fn test_repeated_character_run() {
        let set = defaults();

        assert_eq!(set.find_match("nooooooooooooo").unwrap().id, "repeated_chars");
        assert!(set.find_match("nooooo").is_none());
        // Whitespace breaks a run
        assert!(set.find_match("a a a a a a a a a a a a").is_none());
    }

    #[test]
    fn test_invisible_characters() {
        let set = defaults();

        assert_eq!(set.find_match("hi\u{200B}there").unwrap().id, "invisible_chars");
        assert_eq!(set.find_match("\u{3164}").unwrap().id, "invisible_chars");
        assert_eq!(set.find_match("hello\u{200B}").unwrap().category, RuleCategory::Policy);
    }

    #[test]
    fn test_banned_phrases_on_word_boundaries() {
        let set = defaults();

        assert_eq!(set.find_match("get FREE   Nitro now").unwrap().id, "banned_phrases");
        assert_eq!(set.find_match("steam gift for you").unwrap().id, "banned_phrases");
        assert!(set.find_match("carefree nitrogen").is_none());
    }

    #[test]
    fn test_banned_phrase_rule_omitted_when_empty() {
        let set = PatternSet::with_defaults(&[]).unwrap();
        assert!(set.rules().iter().all(|r| r.id != "banned_phrases"));
        assert_eq!(set.len(), 8);
    }

    #[test]
    fn test_custom_rules_keep_configured_order() {
        let definitions = vec![
            RuleDefinition {
                id: "words".to_string(),
                category: RuleCategory::Spam,
                matcher: MatcherDefinition::MinWords { count: 2 },
            },
            regex_rule("shout", RuleCategory::Policy, r"^[A-Z ]+$", false),
        ];
        let set = PatternSet::compile(&definitions, 100).unwrap();

        assert_eq!(set.find_match("STOP THAT").unwrap().id, "words");
        assert_eq!(set.find_match("STOP").unwrap().id, "shout");
        assert!(set.find_match("stop").is_none());
    }

    #[test]
    fn test_content_is_bounded() {
        let set = PatternSet::compile(&default_rules(&[]), 20).unwrap();
        let content = format!("{} http://example.com", "x ".repeat(20));

        assert!(set.find_match(&content).is_none());
        assert_eq!(set.find_match("http://example.com").unwrap().id, "url");
    }

    #[test]
    fn test_invalid_definitions_fail_at_construction() {
        let bad_regex = vec![regex_rule("broken", RuleCategory::Spam, r"(unclosed", false)];
        assert!(matches!(
            PatternSet::compile(&bad_regex, 100),
            Err(InvalidRuleError::InvalidPattern { ref id, .. }) if id == "broken"
        ));

        let duplicate = vec![
            regex_rule("same", RuleCategory::Spam, "a", false),
            regex_rule("same", RuleCategory::Spam, "b", false),
        ];
        assert!(matches!(
            PatternSet::compile(&duplicate, 100),
            Err(InvalidRuleError::DuplicateId(_))
        ));

        let empty_id = vec![regex_rule("  ", RuleCategory::Spam, "a", false)];
        assert!(matches!(PatternSet::compile(&empty_id, 100), Err(InvalidRuleError::EmptyId)));

        let empty_phrases = vec![RuleDefinition {
            id: "p".to_string(),
            category: RuleCategory::Policy,
            matcher: MatcherDefinition::Phrases { phrases: vec!["   ".to_string()] },
        }];
        assert!(matches!(
            PatternSet::compile(&empty_phrases, 100),
            Err(InvalidRuleError::EmptyPhraseList { .. })
        ));

        let short_run = vec![RuleDefinition {
            id: "r".to_string(),
            category: RuleCategory::Spam,
            matcher: MatcherDefinition::RepeatedRun { min_run: 1 },
        }];
        assert!(matches!(
            PatternSet::compile(&short_run, 100),
            Err(InvalidRuleError::InvalidRunLength { .. })
        ));
    }

    #[test]
    fn test_definitions_deserialize_from_yaml() {
        let yaml = r#"
- id: links
  category: spam
  matcher:
    kind: regex
    pattern: 'https?://'
    case_insensitive: true
- id: zero_width
  category: policy
  matcher:
    kind: invisible
"#;
        let definitions: Vec<RuleDefinition> = serde_yaml::from_str(yaml).unwrap();
        let set = PatternSet::compile(&definitions, DEFAULT_MAX_CONTENT_LENGTH).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.find_match("HTTP://x").unwrap().id, "links");
    }
}
