/// Application name
pub const APP_NAME: &str = "Nuancier";

/// Fallback slug token for groups whose name has no ASCII-representable letters
pub const DEFAULT_GROUP_SLUG: &str = "group";

/// Fallback slug token for colors
pub const DEFAULT_COLOR_SLUG: &str = "color";

/// Maximum display name length (groups and colors)
pub const MAX_NAME_LEN: usize = 150;

/// Maximum slug length, suffix included
pub const MAX_SLUG_LEN: usize = 160;

/// Maximum alt text length for gallery images
pub const MAX_ALT_LEN: usize = 255;

/// Minimum password length accepted on reset / forced change
pub const MIN_PASSWORD_LEN: usize = 8;

/// Length of generated temporary passwords
pub const TEMP_PASSWORD_LEN: usize = 12;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;
