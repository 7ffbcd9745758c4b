pub mod anthropic;
pub mod prompts;
pub mod references;
pub mod selector;
