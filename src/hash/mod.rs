//! Locality-sensitive hash families for string datasets.
//!
//! Strings are decomposed into k-shingles (character n-grams) over a
//! shared vocabulary, then bucketed per stage:
//!
//! - [`MinHashFamily`] hashes the shingle *set*: collision probability
//!   tracks the Jaccard index. Pair it with a Jaccard-style similarity.
//! - [`SuperBitFamily`] hashes the shingle *profile* with batches of
//!   orthogonalized random hyperplanes: collision probability tracks the
//!   cosine of the profiles. Pair it with a cosine-style similarity.
//!
//! Both satisfy [`LshFamily`](crate::build::LshFamily) and plug straight
//! into the partitioning builder.

pub mod minhash;
pub mod shingling;
pub mod superbit;

pub use minhash::MinHashFamily;
pub use shingling::Shingling;
pub use superbit::SuperBitFamily;
