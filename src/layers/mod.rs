mod activation;
mod inner_product;
mod loss;

pub use activation::{ActFn, Activation};
pub use inner_product::InnerProduct;
pub use loss::{MseLoss, SoftmaxWithLoss};
