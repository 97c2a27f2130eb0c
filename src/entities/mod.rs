pub mod batch;
pub mod batch_slot;
pub mod cart;
pub mod cart_item;
pub mod delivery_address;
pub mod id_counter;
pub mod order;
pub mod order_item;
pub mod product;
pub mod shop;

pub use batch::BatchStatus;
pub use order::{OrderStatus, PaymentStatus};
