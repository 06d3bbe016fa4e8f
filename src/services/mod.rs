pub mod extractor;
pub mod ollama;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod validation;
pub mod workers_ai;
