pub mod matching;
pub mod messaging;

pub use matching::{MatchEngine, SwipeOutcome, SwipeStatus};
pub use messaging::{Messenger, SendMessage};
