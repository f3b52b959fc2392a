//! Drawing surface creation.

use resvg::tiny_skia::Pixmap;

use crate::error::{RenderError, Result};

/// Create a transparent drawing surface of the given size.
///
/// `offscreen` surfaces are never presented; they back font textures,
/// tinted variants and snapshots. Both kinds share the same pixel layout
/// (premultiplied RGBA8).
pub fn create_surface(width: u32, height: u32, offscreen: bool) -> Result<Pixmap> {
    let pixmap =
        Pixmap::new(width, height).ok_or(RenderError::InvalidSurfaceSize { width, height })?;
    log::debug!(
        "Created {} surface {}x{}",
        if offscreen { "offscreen" } else { "screen" },
        width,
        height
    );
    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_is_rejected() {
        let err = create_surface(0, 10, false).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidSurfaceSize {
                width: 0,
                height: 10
            }
        ));
    }

    #[test]
    fn test_surface_starts_transparent() {
        let surface = create_surface(4, 4, true).unwrap();
        assert!(surface.data().iter().all(|&b| b == 0));
    }
}
