//! GH-Mind: the "what should I do now?" suggestion engine.

pub mod classifier;
pub mod distance;
pub mod engine;
pub mod feedback;
pub mod preferences;
pub mod selector;
pub mod session;

pub use classifier::matches;
pub use engine::{
    FetchStatus, FetchTicket, GhMind, Outcome, Ports, SuggestionCard, LOGIN_TO_VOTE,
    NO_MORE_SUGGESTIONS, PICK_A_MODE, WAITING_FOR_POSTS,
};
pub use feedback::FeedbackLogger;
pub use preferences::PreferenceStore;
pub use selector::{CandidateSelector, RankedCandidate};
pub use session::{SessionState, SuggestionSession};
