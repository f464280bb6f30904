//! Process exit codes
//!
//! Scripts branch on these, so they stay stable:
//! 0 success, 1 generic failure, 2 usage (emitted by clap), 3 login
//! required, 4 API rejected the request. Lock contention and timeouts exit
//! with 1; their messages already tell the user to retry.

use zoh_auth::ErrorKind;

pub const GENERIC: u8 = 1;
pub const AUTH: u8 = 3;
pub const API: u8 = 4;

/// Map an error chain to an exit code using the first library error in it.
pub fn code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<zoh_auth::Error>())
        .map_or(GENERIC, |e| match e.kind() {
            ErrorKind::Auth => AUTH,
            ErrorKind::Api => API,
            ErrorKind::Retryable | ErrorKind::Other => GENERIC,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use anyhow::Context;
    use zoh_auth::{Error, Region};

    fn wrapped(err: Error) -> anyhow::Error {
        Err::<(), _>(err).context("running command").unwrap_err()
    }

    #[test]
    fn auth_errors_exit_3() {
        assert_eq!(
            code_for(&wrapped(Error::NotAuthenticated { region: Region::Us })),
            AUTH
        );
        assert_eq!(
            code_for(&wrapped(Error::TokenRevoked {
                region: Region::Eu,
                detail: "invalid_grant".into()
            })),
            AUTH
        );
    }

    #[test]
    fn api_errors_exit_4() {
        let err = wrapped(Error::RefreshFailed {
            status: 500,
            body: "oops".into(),
        });
        assert_eq!(code_for(&err), API);
        assert_eq!(code_for(&wrapped(Error::TokenExchange("bad code".into()))), API);
    }

    #[test]
    fn contention_exits_1_with_retry_hint() {
        let err = wrapped(Error::LockTimeout {
            path: PathBuf::from("/tmp/token_us.lock"),
            waited: Duration::from_secs(5),
        });
        assert_eq!(code_for(&err), GENERIC);
        assert!(format!("{err:#}").contains("retry"));
        assert_eq!(code_for(&wrapped(Error::Timeout("slow".into()))), GENERIC);
    }

    #[test]
    fn everything_else_exits_1() {
        assert_eq!(code_for(&anyhow::anyhow!("plain failure")), GENERIC);
        assert_eq!(
            code_for(&wrapped(Error::DecryptionFailed("tag mismatch".into()))),
            GENERIC
        );
        let config_err: anyhow::Error = common::Error::Config("bad".into()).into();
        assert_eq!(code_for(&config_err), GENERIC);
    }
}
