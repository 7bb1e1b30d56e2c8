pub mod builder;
pub mod checkpoint;
pub mod exporter;
pub mod llm;
pub mod outline;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod publish;
pub mod tts;
pub mod validator;
