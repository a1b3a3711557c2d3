/// Precondition check that is active in debug builds or with the `checked`
/// feature, and compiled out otherwise.
macro_rules! contract {
    ($cond:expr) => {
        contract!($cond, "contract violated: {}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if cfg!(any(debug_assertions, feature = "checked")) && !$cond {
            panic!($($arg)+);
        }
    };
}
