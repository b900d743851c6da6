//! Loyalty Storage Layer
//!
//! Provides persistence for ledger world state: accounts, assets and
//! applications (each offer's global record lives on its application).
//!
//! # Architecture
//!
//! - **Repository trait**: Defines the storage interface (port)
//! - **World state**: Clonable snapshot staged and committed as a whole
//! - **In-memory store**: Fast implementation for testing
//!
//! # Usage
//!
//! ```rust
//! use loyalty_store::{LedgerStore, MemoryStore};
//! use loyalty_domain::{Address, Timestamp};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new(Timestamp::from_secs(1_700_000_000));
//!
//!     // Stage a change and commit it
//!     let mut state = store.snapshot().await.unwrap();
//!     state.account_mut(Address::new([1u8; 32])).balance = 1_000_000;
//!     store.commit(state).await.unwrap();
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
mod repository;
mod world;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
pub use repository::LedgerStore;
pub use world::{AccountRecord, ApplicationRecord, AssetRecord, WorldState};
