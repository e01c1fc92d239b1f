pub mod csv_source;
pub mod intent_llm;
pub mod openai;
pub mod recommendation_llm;
pub mod report_store;

pub use csv_source::{load_events, read_events, SourceError};
pub use intent_llm::OpenAiIntentAdapter;
pub use openai::openai_client;
pub use recommendation_llm::OpenAiRecommendationAdapter;
pub use report_store::{load_report, write_report, ReportCheckpoint, ReportError};
