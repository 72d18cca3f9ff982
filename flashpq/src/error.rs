/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fmt::{Debug, Display},
    io,
};

/// Convenience alias for a `Result<T, AnnError>`.
pub type AnnResult<T> = Result<T, AnnError>;

/// Common error type shared through the flashpq crates.
///
/// The runtime origin of an error is disambiguated by [`AnnError::kind`];
/// the wrapped [`anyhow::Error`] carries the source chain and any context
/// attached while the error propagated.
#[derive(Debug)]
pub struct AnnError {
    kind: AnnErrorKind,
    error: anyhow::Error,
}

/// Discriminant describing where an [`AnnError`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnErrorKind {
    /// An operating-system I/O failure.
    IOError,

    /// A persisted artifact did not match the expected wire layout, or ended
    /// before the layout said it would.
    InvalidFileFormat,

    /// Quantizer construction or use with inconsistent dimensions,
    /// codebooks, or codes.
    QuantizerError,

    /// An input slice whose length disagrees with the configured dimensions.
    DimensionMismatch,

    /// A disk read request that violates the sector-alignment contract.
    DiskIOAlignment,

    /// A failure inside the asynchronous reader's submission or completion
    /// machinery.
    AsyncIOError,

    /// An operation attempted in a state that does not permit it.
    InvalidOperation,
}

impl AnnError {
    /// Wrap a concrete error, tagging it with `kind`.
    ///
    /// Constructed errors are logged at `error` level as a side effect.
    #[track_caller]
    #[inline(never)]
    pub fn new<E>(kind: AnnErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        tracing::error!(?kind, error = %err, "error raised");
        Self {
            kind,
            error: anyhow::Error::new(err),
        }
    }

    /// Construct an error from a displayable message.
    ///
    /// Constructed errors are logged at `error` level as a side effect.
    #[track_caller]
    #[inline(never)]
    pub fn message<D>(kind: AnnErrorKind, message: D) -> Self
    where
        D: Display + Debug + Send + Sync + 'static,
    {
        tracing::error!(?kind, %message, "error raised");
        Self {
            kind,
            error: anyhow::Error::msg(message),
        }
    }

    /// Attach context to the error, preserving its kind and source chain.
    #[inline(never)]
    pub fn context<C>(self, context: C) -> Self
    where
        C: Display + Send + Sync + 'static,
    {
        Self {
            kind: self.kind,
            error: self.error.context(context),
        }
    }

    /// The kind assigned when the error was first constructed.
    pub fn kind(&self) -> AnnErrorKind {
        self.kind
    }
}

impl Display for AnnError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The debug format of `anyhow::Error` prints the whole source chain.
        write!(formatter, "AnnError: {:?}\n\n{:?}", self.kind, self.error)
    }
}

impl std::error::Error for AnnError {
    // The source chain is already part of the `Display` output.
}

impl From<io::Error> for AnnError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        AnnError::new(AnnErrorKind::IOError, err)
    }
}

/// Attach context to the error half of a result while converting it into an
/// [`AnnError`].
pub trait ErrorContext<T> {
    /// Attach the provided context to the error part of the result.
    fn context<C>(self, context: C) -> AnnResult<T>
    where
        C: Display + Send + Sync + 'static;

    /// Attach lazily-built context to the error part of the result.
    ///
    /// `f` is only evaluated when `self` is an `Err`.
    fn with_context<F, C>(self, f: F) -> AnnResult<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    AnnError: From<E>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> AnnResult<T>
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(AnnError::from(error).context(context)),
        }
    }

    #[track_caller]
    fn with_context<F, C>(self, f: F) -> AnnResult<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(AnnError::from(error).context(f())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_and_sync<T: Send + Sync>() {}
        assert_send_and_sync::<AnnError>();
    }

    #[test]
    fn kind_is_preserved_through_context() {
        let err = AnnError::message(AnnErrorKind::QuantizerError, "bad codebook")
            .context("while loading the index");
        assert_eq!(err.kind(), AnnErrorKind::QuantizerError);

        let formatted = err.to_string();
        assert!(formatted.contains("bad codebook"));
        assert!(formatted.contains("while loading the index"));
    }

    #[test]
    fn io_error_conversion() {
        fn read() -> AnnResult<()> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short read"))?;
            Ok(())
        }

        let err = read().unwrap_err();
        assert_eq!(err.kind(), AnnErrorKind::IOError);
        assert!(err.to_string().contains("short read"));
    }

    #[test]
    fn result_context_applies_only_on_error() {
        let ok: Result<u32, io::Error> = Ok(7);
        assert_eq!(ok.context("unused").unwrap(), 7);

        let err: Result<u32, io::Error> = Err(io::Error::other("boom"));
        let err = err.with_context(|| "reading header").unwrap_err();
        assert_eq!(err.kind(), AnnErrorKind::IOError);
        assert!(err.to_string().contains("reading header"));
    }
}
