// One task per stage that waits on user input
pub mod attribute_collection;
pub mod complete;
pub mod document_collection;
pub mod greeting;
pub mod product_selection;
pub mod quote_loading;
pub mod quote_presented;

pub use attribute_collection::AttributeCollectionTask;
pub use complete::CompleteTask;
pub use document_collection::DocumentCollectionTask;
pub use greeting::{GreetingTask, START_OPTION};
pub use product_selection::ProductSelectionTask;
pub use quote_loading::{QuoteLoadingTask, RETRY_OPTION};
pub use quote_presented::QuotePresentedTask;
