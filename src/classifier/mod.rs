//! Three-tier category detection: explicit references, mentioned users,
//! then fuzzy keyword scoring.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::directory::DirectorySnapshot;
use crate::keywords::KeywordSet;
use crate::text::{adaptive_threshold, normalize, similarity};

/// Department responsible for a ticket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    It,
    Man,
    Ama,
    Room,
    Seg,
}

impl Team {
    pub const ALL: [Team; 5] = [Team::It, Team::Man, Team::Ama, Team::Room, Team::Seg];

    pub fn code(&self) -> &'static str {
        match self {
            Self::It => "it",
            Self::Man => "man",
            Self::Ama => "ama",
            Self::Room => "room",
            Self::Seg => "seg",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::It => "IT",
            Self::Man => "Mantenimiento",
            Self::Ama => "Ama de Llaves",
            Self::Room => "Room Service",
            Self::Seg => "Seguridad",
        }
    }

    /// Short tag used in status messages.
    pub fn emoji_label(&self) -> &'static str {
        match self {
            Self::It => "💻IT",
            Self::Man => "🔧MANT",
            Self::Ama => "🔑HSKP",
            Self::Room => "🍽️RS",
            Self::Seg => "🚨SEG",
        }
    }

    /// Trigger words that unambiguously name the team (tier 1).
    fn explicit_references(&self) -> &'static [&'static str] {
        match self {
            Self::It => &["it", "sistemas"],
            Self::Man => &["mantenimiento", "manto", "mant"],
            Self::Ama => &["hskp", "ama de llaves"],
            Self::Room => &["roomservice", "room service"],
            Self::Seg => &["seguridad"],
        }
    }
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "it" => Ok(Self::It),
            "man" => Ok(Self::Man),
            "ama" => Ok(Self::Ama),
            "room" | "rs" => Ok(Self::Room),
            "seg" => Ok(Self::Seg),
            other => Err(format!("unknown team code: {other}")),
        }
    }
}

/// Fixed bonus a phrase match contributes in tier 3.
const PHRASE_BONUS: f64 = 1.2;
/// Accumulated score at which a team is included in tier 3.
const SCORE_THRESHOLD: f64 = 1.0;

/// Assign responsible teams to a free-text report.
///
/// Ordered filter chain: the first tier producing a non-empty result
/// short-circuits the rest. An empty result is not an error; the caller must
/// prompt the reporter for clarification instead of dropping the report.
pub fn classify(
    text: &str,
    mentioned_users: &[String],
    keywords: &KeywordSet,
    directory: &DirectorySnapshot,
) -> Vec<Team> {
    let norm_text = normalize(text);
    if norm_text.is_empty() {
        return Vec::new();
    }

    // Tier 1: explicit team references. Single-word references match whole
    // tokens only ("it" must not fire on "habitación"); multiword ones are
    // substring checks on the normalized text.
    let tokens: HashSet<&str> = norm_text.split_whitespace().collect();
    let explicit: Vec<Team> = Team::ALL
        .iter()
        .copied()
        .filter(|team| {
            team.explicit_references().iter().any(|term| {
                let norm_term = normalize(term);
                if norm_term.contains(' ') {
                    norm_text.contains(&norm_term)
                } else {
                    tokens.contains(norm_term.as_str())
                }
            })
        })
        .collect();
    if !explicit.is_empty() {
        return explicit;
    }

    // Tier 2: teams of mentioned users, in mention order, deduped.
    let mut mentioned: Vec<Team> = Vec::new();
    for user_id in mentioned_users {
        if let Some(team) = directory.get(user_id).and_then(|u| u.team) {
            if !mentioned.contains(&team) {
                mentioned.push(team);
            }
        }
    }
    if !mentioned.is_empty() {
        return mentioned;
    }

    // Tier 3: fuzzy keyword scoring against the dictionary snapshot.
    let mut found = Vec::new();
    for team in Team::ALL {
        let Some(vocab) = keywords.identifiers.get(&team) else {
            continue;
        };

        let mut score = 0.0;
        for keyword in &vocab.words {
            let norm_key = normalize(keyword);
            for token in &tokens {
                let sim = similarity(token, &norm_key);
                if sim >= adaptive_threshold(token, &norm_key) {
                    score += sim;
                }
            }
        }
        for phrase in &vocab.phrases {
            if norm_text.contains(&normalize(phrase)) {
                score += PHRASE_BONUS;
            }
        }

        if score >= SCORE_THRESHOLD {
            found.push(team);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::UserRecord;
    use crate::keywords::Vocabulary;
    use std::collections::HashMap;

    fn keywords_with(team: Team, words: &[&str], phrases: &[&str]) -> KeywordSet {
        let mut set = KeywordSet::default();
        set.identifiers.insert(
            team,
            Vocabulary {
                words: words.iter().map(|s| s.to_string()).collect(),
                phrases: phrases.iter().map(|s| s.to_string()).collect(),
            },
        );
        set
    }

    fn empty_directory() -> DirectorySnapshot {
        DirectorySnapshot::from_users(HashMap::new())
    }

    #[test]
    fn tier1_explicit_reference_short_circuits() {
        let keywords = keywords_with(Team::Ama, &["toalla"], &[]);
        let cats = classify(
            "falla en sistemas y faltan toallas",
            &[],
            &keywords,
            &empty_directory(),
        );
        // "sistemas" names IT explicitly; keyword tiers never run.
        assert_eq!(cats, vec![Team::It]);
    }

    #[test]
    fn tier1_matches_diacritic_variants() {
        let cats = classify(
            "problema de manteniMIENTO en el lobby",
            &[],
            &KeywordSet::default(),
            &empty_directory(),
        );
        assert_eq!(cats, vec![Team::Man]);
    }

    #[test]
    fn tier1_single_word_reference_requires_whole_token() {
        let keywords = keywords_with(Team::Man, &["fuga"], &[]);
        // "habitación" contains "it" but must not name the IT team.
        let cats = classify(
            "fuga en la habitación 204",
            &[],
            &keywords,
            &empty_directory(),
        );
        assert_eq!(cats, vec![Team::Man]);
    }

    #[test]
    fn tier2_uses_mentioned_user_teams() {
        let mut users = HashMap::new();
        users.insert(
            "5211000@c.us".to_string(),
            UserRecord {
                display_name: "Laura".into(),
                title: "Supervisora".into(),
                role: crate::directory::Role::User,
                team: Some(Team::Ama),
            },
        );
        let directory = DirectorySnapshot::from_users(users);
        let cats = classify(
            "favor de apoyar con esto",
            &["5211000@c.us".to_string()],
            &KeywordSet::default(),
            &directory,
        );
        assert_eq!(cats, vec![Team::Ama]);
    }

    #[test]
    fn tier3_accumulates_word_scores() {
        let keywords = keywords_with(Team::It, &["internet", "impresora"], &[]);
        let cats = classify(
            "no hay internet y la impresora no funciona",
            &[],
            &keywords,
            &empty_directory(),
        );
        assert_eq!(cats, vec![Team::It]);
    }

    #[test]
    fn tier3_single_weak_word_is_not_enough_without_phrase() {
        // One fuzzy word match contributes < 1.0 only when similarity < 1.0,
        // an exact token match alone reaches the threshold.
        let keywords = keywords_with(Team::Man, &["fuga"], &[]);
        let cats = classify("hay una fuga en 204", &[], &keywords, &empty_directory());
        assert_eq!(cats, vec![Team::Man]);
    }

    #[test]
    fn tier3_phrase_bonus_crosses_threshold() {
        let keywords = keywords_with(Team::Room, &[], &["servicio a la habitacion"]);
        let cats = classify(
            "solicito servicio a la habitación 1010",
            &[],
            &keywords,
            &empty_directory(),
        );
        assert_eq!(cats, vec![Team::Room]);
    }

    #[test]
    fn no_match_returns_empty() {
        let cats = classify(
            "buenos dias a todos",
            &[],
            &KeywordSet::default(),
            &empty_directory(),
        );
        assert!(cats.is_empty());
    }
}
