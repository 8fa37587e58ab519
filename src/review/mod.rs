//! Dual-agent review: report shapes, the two review executors, decision
//! synthesis, and the coordinator that sequences them.

pub mod coordinator;
pub mod decision;
pub mod independent;
pub mod report;
pub mod self_review;

pub use coordinator::{
    AggregatedFinding, CombinedReviewResult, FindingSource, ReviewCoordinator,
};
pub use decision::{DEFAULT_CONFIDENCE_THRESHOLD, GateDecision, decide};
pub use independent::{DEGRADED_CATEGORY_SCORE, IndependentReviewExecutor, degraded_report};
pub use report::{
    CategoryScores, ChecklistItem, CodeSmell, IndependentReviewReport, QualityAnalysis,
    ReviewDecision, ReviewFindingItem, SecurityReview, SelfReviewReport, TestValidation,
};
pub use self_review::SelfReviewExecutor;
