//! Execution id and name generation

use chrono::Utc;
use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &[
    "brave", "calm", "clever", "eager", "fancy", "gentle", "happy", "jolly", "kind", "lively",
    "lucky", "mighty", "nimble", "proud", "quick", "quiet", "shiny", "swift", "tidy", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "beaver", "falcon", "ferret", "gecko", "heron", "koala", "lynx", "marten", "moose",
    "otter", "panda", "puffin", "raven", "salmon", "stork", "tiger", "walrus", "wombat", "yak",
];

/// 24 hex characters: big-endian Unix seconds followed by 8 random bytes
pub fn generate_execution_id() -> String {
    let seconds = Utc::now().timestamp().max(0) as u32;
    let random: u64 = rand::random();
    format!("{seconds:08x}{random:016x}")
}

/// Readable random name such as `swift-otter-0421`
pub fn random_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("quick");
    let noun = NOUNS.choose(&mut rng).copied().unwrap_or("otter");
    let suffix: u32 = rand::random::<u32>() % 10000;
    format!("{adjective}-{noun}-{suffix:04}")
}
