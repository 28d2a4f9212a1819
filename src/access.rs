use rand::Rng;
use std::collections::HashSet;

/// Characters used for generated access codes
const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default length of a generated access code
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Largest batch the admin form will produce in one go
pub const MAX_BATCH: usize = 500;

/// Longest code the generator will produce
pub const MAX_CODE_LENGTH: usize = 32;

/// Outcome of checking a submitted access code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The code is one of the configured access codes
    Granted,
    /// The code matched the administrator password
    Admin,
    /// Anything else
    Denied,
}

/// The configured access codes and the administrator password
///
/// Codes are compared exactly (case-sensitive). Order and duplicates in the
/// configuration value carry no meaning.
#[derive(Debug, Clone, Default)]
pub struct AccessCodes {
    codes: HashSet<String>,
    admin_password: Option<String>,
}

impl AccessCodes {
    /// Build the code set from a comma-separated configuration value
    ///
    /// # Arguments
    /// * `codes` - Comma-separated list, e.g. `"VIP001, VIP002"`
    /// * `admin_password` - Password that unlocks the code generator
    ///
    /// # Examples
    /// ```
    /// use insight::access::{Access, AccessCodes};
    ///
    /// let codes = AccessCodes::from_config("VIP001, VIP002", Some("hunter2"));
    /// assert_eq!(codes.check(" VIP002 "), Access::Granted);
    /// assert_eq!(codes.check("vip002"), Access::Denied);
    /// assert_eq!(codes.check("hunter2"), Access::Admin);
    /// ```
    pub fn from_config(codes: &str, admin_password: Option<&str>) -> Self {
        let codes = codes
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        let admin_password = admin_password
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        AccessCodes {
            codes,
            admin_password,
        }
    }

    /// Check a submitted code
    ///
    /// The submitted value is trimmed before comparison. The admin password
    /// wins over the code set if both happen to contain the same string.
    pub fn check(&self, submitted: &str) -> Access {
        let submitted = submitted.trim();
        if submitted.is_empty() {
            return Access::Denied;
        }

        if self.admin_password.as_deref() == Some(submitted) {
            return Access::Admin;
        }

        if self.codes.contains(submitted) {
            Access::Granted
        } else {
            Access::Denied
        }
    }

    /// Number of distinct configured codes
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn has_admin(&self) -> bool {
        self.admin_password.is_some()
    }
}

/// Generate a batch of random access codes
///
/// Each code is `prefix` followed by `length` characters from `A-Z0-9`.
/// `count` is clamped to `1..=MAX_BATCH` and `length` to `4..=MAX_CODE_LENGTH`. Codes
/// within a batch are unique.
///
/// # Examples
/// ```
/// use insight::access::generate_codes;
///
/// let codes = generate_codes(5, 8, "VIP-");
/// assert_eq!(codes.len(), 5);
/// assert!(codes.iter().all(|c| c.starts_with("VIP-") && c.len() == 12));
/// ```
pub fn generate_codes(count: usize, length: usize, prefix: &str) -> Vec<String> {
    let count = count.clamp(1, MAX_BATCH);
    let length = length.clamp(4, MAX_CODE_LENGTH);
    let mut rng = rand::thread_rng();
    let mut seen = HashSet::with_capacity(count);
    let mut batch = Vec::with_capacity(count);

    while batch.len() < count {
        let body: String = (0..length)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect();
        let code = format!("{}{}", prefix, body);
        if seen.insert(code.clone()) {
            batch.push(code);
        }
    }

    batch
}

/// Join a batch so it can be appended to the `VALID_CODES` value
pub fn format_batch(codes: &[String]) -> String {
    codes.join(",")
}
