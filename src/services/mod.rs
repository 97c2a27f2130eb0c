pub mod batch_slots;
pub mod batches;
pub mod cutoff;
pub mod delivery;
pub mod orders;
pub mod sweeper;
