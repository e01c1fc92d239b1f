pub mod domain;
pub mod ports;
pub mod segmenter;

pub use domain::{
    AnalysisReport, AnalysisRequest, Event, IntentCategory, IntentRecord, OperationRecommendation,
    Session, UserResult,
};
pub use ports::{
    ClassificationRequest, ClassifierOutput, IntentClassificationService,
    OperationRecommendationService, PortError, PortResult, RecommendationRequest, SessionStep,
    UserContext,
};
pub use segmenter::{SegmentError, SessionSegmenter, DEFAULT_SESSION_TIMEOUT_MINUTES};
