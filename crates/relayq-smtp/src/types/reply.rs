//! SMTP reply types.

/// SMTP reply from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code (e.g., 250).
    pub code: ReplyCode,
    /// Raw reply lines, code included.
    pub lines: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec is not const-compatible
    pub fn new(code: ReplyCode, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Returns the last line of the reply, the one that carries the final
    /// status text.
    #[must_use]
    pub fn last_line(&self) -> &str {
        self.lines.last().map_or("", String::as_str)
    }

    /// Returns the full reply as a single string.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Reply codes from RFC 5321 and RFC 4954
impl ReplyCode {
    /// 211 System status, or system help reply
    pub const SYSTEM_STATUS: Self = Self(211);
    /// 214 Help message
    pub const HELP_MESSAGE: Self = Self(214);
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const DISCONNECTING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_OK: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 251 User not local; will forward
    pub const FORWARD: Self = Self(251);
    /// 252 Cannot verify user, but will accept message
    pub const CANNOT_VERIFY_USER: Self = Self(252);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input; end with `<CRLF>.<CRLF>`
    pub const START_MAIL: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_NOT_AVAILABLE: Self = Self(421);
    /// 432 A password transition is needed
    pub const PASSWORD_TRANSITION_NEEDED: Self = Self(432);
    /// 450 Mailbox unavailable (busy or temporarily blocked)
    pub const MAILBOX_TEMP_UNAVAILABLE: Self = Self(450);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage
    pub const SYSTEM_STORAGE_ERROR: Self = Self(452);
    /// 454 Temporary authentication failure
    pub const TEMP_AUTH_FAILURE: Self = Self(454);
    /// 455 Server unable to accommodate parameters
    pub const PARAMETERS_ERROR: Self = Self(455);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const ARGUMENTS_SYNTAX_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const COMMAND_NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_COMMAND_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const COMMAND_PARAMETER_ERROR: Self = Self(504);
    /// 530 Authentication required
    pub const AUTH_REQUIRED: Self = Self(530);
    /// 534 Authentication mechanism is too weak
    pub const WEAK_AUTH_MECHANISM: Self = Self(534);
    /// 535 Authentication credentials invalid
    pub const INVALID_CREDENTIALS: Self = Self(535);
    /// 538 Encryption required for requested authentication mechanism
    pub const ENCRYPTION_REQUIRED: Self = Self(538);
    /// 550 Mailbox unavailable (not found, access denied, policy)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 551 User not local
    pub const NON_LOCAL_USER: Self = Self(551);
    /// 552 Exceeded storage allocation
    pub const STORAGE_LIMIT_EXCEEDED: Self = Self(552);
    /// 553 Mailbox name not allowed
    pub const MAILBOX_NAME_ERROR: Self = Self(553);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
    /// 555 MAIL FROM/RCPT TO parameters not recognized
    pub const RECIPIENT_OR_SENDER_ERROR: Self = Self(555);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod reply_code_tests {
        use super::*;

        #[test]
        fn success_codes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::SERVICE_READY.is_success());
            assert!(ReplyCode::DISCONNECTING.is_success());
            assert!(ReplyCode::FORWARD.is_success());
            assert!(ReplyCode::AUTH_OK.is_success());
        }

        #[test]
        fn intermediate_codes() {
            assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
            assert!(ReplyCode::START_MAIL.is_intermediate());
            assert!(!ReplyCode::OK.is_intermediate());
        }

        #[test]
        fn transient_errors() {
            assert!(ReplyCode::SERVICE_NOT_AVAILABLE.is_transient());
            assert!(ReplyCode::MAILBOX_TEMP_UNAVAILABLE.is_transient());
            assert!(ReplyCode::TEMP_AUTH_FAILURE.is_transient());
        }

        #[test]
        fn permanent_errors() {
            assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
            assert!(ReplyCode::INVALID_CREDENTIALS.is_permanent());
            assert!(ReplyCode::RECIPIENT_OR_SENDER_ERROR.is_permanent());
            assert!(!ReplyCode::LOCAL_ERROR.is_permanent());
        }

        #[test]
        fn display() {
            assert_eq!(format!("{}", ReplyCode::OK), "250");
            assert_eq!(ReplyCode::new(421).to_string(), "421");
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn last_line_of_multiline_reply() {
            let reply = Reply::new(
                ReplyCode::OK,
                vec!["250-mx.example.com".to_string(), "250 SIZE 1000".to_string()],
            );
            assert_eq!(reply.last_line(), "250 SIZE 1000");
            assert_eq!(reply.text(), "250-mx.example.com\n250 SIZE 1000");
        }

        #[test]
        fn empty_reply() {
            let reply = Reply::new(ReplyCode::OK, vec![]);
            assert_eq!(reply.last_line(), "");
        }
    }
}
