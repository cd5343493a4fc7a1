use std::fmt;

/// Wraps a value so that `Debug` and `Display` never print it.
///
/// Used for anything that must never appear in a diagnostic snapshot, error
/// message, or event-log line — passwords being the primary case. Masking is
/// idempotent: masking an already-masked value twice is identical to masking
/// it once, since the wrapper holds the plaintext once and always renders the
/// same placeholder.
#[derive(Clone)]
pub struct Masked<T>(T);

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Access the unmasked value. Call sites that need the real value (the
    /// MySQL driver connecting, for instance) use this explicitly so masking
    /// is never bypassed by accident.
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl<T> serde::Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_twice_is_identical_to_masking_once() {
        let once = format!("{:?}", Masked::new("hunter2"));
        let twice = format!("{:?}", Masked::new(Masked::new("hunter2")));
        assert_eq!(once, twice);
        assert_eq!(once, "***");
    }

    #[test]
    fn expose_recovers_the_value() {
        let m = Masked::new("s3cr3t".to_string());
        assert_eq!(m.expose(), "s3cr3t");
    }
}
