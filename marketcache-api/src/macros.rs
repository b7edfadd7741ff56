//! Helper macros for the API crate.

/// Implement `FromRef<AppState>` for a field so handlers can extract it
/// directly with `State<T>`.
///
/// # Example
/// ```ignore
/// impl_from_ref!(Arc<MarketReader>, reader);
/// // Expands to:
/// impl axum::extract::FromRef<AppState> for Arc<MarketReader> {
///     fn from_ref(state: &AppState) -> Self {
///         state.reader.clone()
///     }
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<$crate::state::AppState> for $type {
            fn from_ref(state: &$crate::state::AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}
