pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

// Реэкспорт типов ошибок и функций из подмодулей для удобства внешнего
// кода.
pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

pub type MxResult<T> = Result<T, StackError>;
