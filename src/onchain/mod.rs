//! Chain-facing half of the lookup: block resolution, log backfill and
//! event decoding.

pub mod backfill;
pub mod blocks;
pub mod decode;
