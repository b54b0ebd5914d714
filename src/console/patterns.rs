//! Console response catalogue
//!
//! These are the texts the vanilla server prints for the commands the bridge
//! issues. They are a contract with an unversioned text stream, so bump
//! `PATTERN_VERSION` whenever one of them changes.

use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

use super::matcher::{PatternMatcher, SharedMatcher};

pub const PATTERN_VERSION: &str = "vanilla-1.20";

static LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"There are (\d+)(?: of a max of |/)(\d+) players online:(?:\s*(.*))?$")
        .expect("static list pattern")
});
static WHITELIST_ADDED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Added (\w+) to the whitelist").expect("static whitelist pattern")
});
static WHITELIST_REMOVED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Removed (\w+) from the whitelist").expect("static whitelist pattern")
});
static PLAYER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,16}$").expect("static name pattern"));

const ALREADY_WHITELISTED: &str = "Player is already whitelisted";
const NOT_WHITELISTED: &str = "Player is not whitelisted";
const UNKNOWN_PLAYER: &str = "That player does not exist";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub count: u32,
    pub max: u32,
    pub names: Vec<String>,
}

/// What a matched console line says, independent of who asked
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleResponse {
    PlayerList(PlayerSnapshot),
    WhitelistAdded(String),
    AlreadyWhitelisted,
    WhitelistRemoved(String),
    NotWhitelisted,
    UnknownPlayer,
}

pub fn is_valid_player_name(name: &str) -> bool {
    PLAYER_NAME.is_match(name)
}

pub fn list_matcher() -> SharedMatcher {
    Arc::new(PatternMatcher::from_regex(LIST.clone()))
}

/// Only the success line names the player. The refusal lines are generic,
/// so two concurrent whitelist calls can still cross-match on them. The
/// server echoes the profile's own spelling, so the name is matched without
/// regard to case.
pub fn whitelist_add_matcher(name: &str) -> SharedMatcher {
    let pattern = format!(
        r"Added (?i:{}) to the whitelist|{}|{}",
        regex::escape(name),
        regex::escape(ALREADY_WHITELISTED),
        regex::escape(UNKNOWN_PLAYER)
    );
    Arc::new(PatternMatcher::from_regex(
        Regex::new(&pattern).expect("escaped whitelist pattern"),
    ))
}

pub fn whitelist_remove_matcher(name: &str) -> SharedMatcher {
    let pattern = format!(
        r"Removed (?i:{}) from the whitelist|{}|{}",
        regex::escape(name),
        regex::escape(NOT_WHITELISTED),
        regex::escape(UNKNOWN_PLAYER)
    );
    Arc::new(PatternMatcher::from_regex(
        Regex::new(&pattern).expect("escaped whitelist pattern"),
    ))
}

pub fn parse_player_list(text: &str) -> Option<PlayerSnapshot> {
    let caps = LIST.captures(text)?;
    let count = caps.get(1)?.as_str().parse().ok()?;
    let max = caps.get(2)?.as_str().parse().ok()?;
    let names = caps
        .get(3)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Some(PlayerSnapshot { count, max, names })
}

pub fn classify(text: &str) -> Option<ConsoleResponse> {
    if let Some(snapshot) = parse_player_list(text) {
        return Some(ConsoleResponse::PlayerList(snapshot));
    }
    if let Some(caps) = WHITELIST_ADDED.captures(text) {
        return Some(ConsoleResponse::WhitelistAdded(caps[1].to_string()));
    }
    if let Some(caps) = WHITELIST_REMOVED.captures(text) {
        return Some(ConsoleResponse::WhitelistRemoved(caps[1].to_string()));
    }
    if text.contains(ALREADY_WHITELISTED) {
        return Some(ConsoleResponse::AlreadyWhitelisted);
    }
    if text.contains(NOT_WHITELISTED) {
        return Some(ConsoleResponse::NotWhitelisted);
    }
    if text.contains(UNKNOWN_PLAYER) {
        return Some(ConsoleResponse::UnknownPlayer);
    }
    None
}
