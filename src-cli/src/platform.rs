//! Platform detection and handling.
//!
//! The X11 backend can only see X clients; on a Wayland session it records
//! XWayland windows and black frames for everything else.

/// Check if the session is a Wayland session.
pub fn is_wayland_session() -> bool {
    #[cfg(target_os = "linux")]
    {
        std::env::var("WAYLAND_DISPLAY").is_ok()
            || std::env::var("XDG_SESSION_TYPE")
                .map(|t| t == "wayland")
                .unwrap_or(false)
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Get the name of the current desktop environment (for messages).
pub fn desktop_name() -> Option<String> {
    std::env::var("XDG_CURRENT_DESKTOP").ok().filter(|d| !d.is_empty())
}
