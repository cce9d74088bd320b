pub mod asset_key;
pub mod llm_instructions;
