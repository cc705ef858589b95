// Athena Engine
//
// Module layout:
//   config        — default paths under ~/.athena, TOML config loading
//   locks         — keyed lock table (per record id / pattern key / category)
//   store         — BrainStore: SQLite connection, schema, row-level CRUD
//   vault         — EncryptedVectorStore: sealing, integrity, nearest-neighbour
//   memory        — embedding gateway + MemoryManager (store/search/forget)
//   evolution     — MistakeTracker + RuleSynthesizer
//   personalization — EMA preference profile with snapshot reads
//   brain         — Brain facade wiring everything together

pub mod brain;
pub mod config;
pub mod evolution;
pub mod locks;
pub mod memory;
pub mod personalization;
pub mod store;
pub mod vault;
