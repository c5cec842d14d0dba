pub const CLASSIFY_PROMPT_MD: &str = include_str!("../prompts/classify.md");
pub const GENERATE_CLAIMS_PROMPT_MD: &str = include_str!("../prompts/generate_claims.md");
pub const CHALLENGE_PROMPT_MD: &str = include_str!("../prompts/challenge.md");
pub const SYNTHESIZE_PROMPT_MD: &str = include_str!("../prompts/synthesize.md");
pub const VERIFY_PROMPT_MD: &str = include_str!("../prompts/verify.md");
pub const ELABORATE_PROMPT_MD: &str = include_str!("../prompts/elaborate.md");
pub const CONTINUITY_CHECK_PROMPT_MD: &str = include_str!("../prompts/continuity_check.md");
pub const SUMMARIZE_PROMPT_MD: &str = include_str!("../prompts/summarize.md");
