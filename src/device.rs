//! UI automation surface consumed by the engine.
//!
//! [`Device`] is the capability boundary to whatever drives the phone
//! (accessibility service, adb bridge, test double). Elements are looked up
//! with a [`Selector`]; every geometric value is in screen pixels.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use regex::Regex;

use crate::error::DeviceError;

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Point at the given fractions of the screen, e.g. `(0.5, 0.7)`.
    pub fn fraction(&self, fx: f64, fy: f64) -> Point {
        Point::new(
            (self.width as f64 * fx).round() as i32,
            (self.height as f64 * fy).round() as i32,
        )
    }
}

/// Element bounding rectangle, edges inclusive of `left`/`top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn center(&self) -> Point {
        let mid = |a: i32, b: i32| ((i64::from(a) + i64::from(b)) / 2) as i32;
        Point::new(mid(self.left, self.right), mid(self.top, self.bottom))
    }
}

/// A rectangle of the screen, validated against the device bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Builds the region spanned by a leading and a trailing anchor.
    ///
    /// The origin is the leading anchor's top-left corner; the region extends
    /// right to the trailing anchor's right edge and down to its top edge.
    /// Returns `None` for a non-positive extent or a region leaving the screen.
    pub fn from_anchors(leading: &Bounds, trailing: &Bounds, screen: ScreenSize) -> Option<Self> {
        let width = trailing.right.checked_sub(leading.left)?;
        let height = trailing.top.checked_sub(leading.top)?;
        if width <= 0 || height <= 0 || leading.left < 0 || leading.top < 0 {
            return None;
        }
        let region = Self {
            origin_x: leading.left as u32,
            origin_y: leading.top as u32,
            width: width as u32,
            height: height as u32,
        };
        region.fits(screen).then_some(region)
    }

    pub fn fits(&self, screen: ScreenSize) -> bool {
        self.width > 0
            && self.height > 0
            && self.origin_x + self.width <= screen.width
            && self.origin_y + self.height <= screen.height
    }

    pub fn origin(&self) -> Point {
        Point::new(self.origin_x as i32, self.origin_y as i32)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{}x{})",
            self.origin_x, self.origin_y, self.width, self.height
        )
    }
}

/// Snapshot of a UI node as reported by the backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub text: String,
    pub desc: String,
    pub id: String,
    pub class: String,
    pub bounds: Bounds,
    pub enabled: bool,
    pub clickable: bool,
}

/// Element query predicate.
#[derive(Debug, Clone)]
pub enum Selector {
    Text(String),
    TextContains(String),
    /// Text contains any of the fragments.
    TextAny(Vec<String>),
    TextMatches(Regex),
    Desc(String),
    /// Description contains any of the fragments.
    DescAny(Vec<String>),
    Id(String),
    /// Resource id contains any of the fragments.
    IdAny(Vec<String>),
    Class(String),
    Clickable,
    All(Vec<Selector>),
}

impl Selector {
    pub fn text(text: impl Into<String>) -> Self {
        Selector::Text(text.into())
    }

    pub fn text_contains(fragment: impl Into<String>) -> Self {
        Selector::TextContains(fragment.into())
    }

    pub fn text_any<S: AsRef<str>>(fragments: &[S]) -> Self {
        Selector::TextAny(fragments.iter().map(|s| s.as_ref().to_string()).collect())
    }

    pub fn desc(desc: impl Into<String>) -> Self {
        Selector::Desc(desc.into())
    }

    pub fn desc_any<S: AsRef<str>>(fragments: &[S]) -> Self {
        Selector::DescAny(fragments.iter().map(|s| s.as_ref().to_string()).collect())
    }

    pub fn id(id: impl Into<String>) -> Self {
        Selector::Id(id.into())
    }

    pub fn id_any<S: AsRef<str>>(fragments: &[S]) -> Self {
        Selector::IdAny(fragments.iter().map(|s| s.as_ref().to_string()).collect())
    }

    /// Element of `class` whose text equals `text`.
    pub fn class_text(class: impl Into<String>, text: impl Into<String>) -> Self {
        Selector::All(vec![Selector::Class(class.into()), Selector::Text(text.into())])
    }

    /// Class names match on the full name or its simple suffix,
    /// so `"TextView"` matches `"android.widget.TextView"`.
    pub fn matches(&self, element: &Element) -> bool {
        match self {
            Selector::Text(t) => element.text == *t,
            Selector::TextContains(f) => element.text.contains(f.as_str()),
            Selector::TextAny(fs) => fs.iter().any(|f| element.text.contains(f.as_str())),
            Selector::TextMatches(re) => re.is_match(&element.text),
            Selector::Desc(d) => element.desc == *d,
            Selector::DescAny(fs) => fs.iter().any(|f| element.desc.contains(f.as_str())),
            Selector::Id(id) => element.id == *id,
            Selector::IdAny(fs) => fs.iter().any(|f| element.id.contains(f.as_str())),
            Selector::Class(c) => {
                element.class == *c || element.class.rsplit('.').next() == Some(c.as_str())
            }
            Selector::Clickable => element.clickable,
            Selector::All(parts) => parts.iter().all(|s| s.matches(element)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Text(t) => write!(f, "text={t:?}"),
            Selector::TextContains(t) => write!(f, "text~{t:?}"),
            Selector::TextAny(ts) => write!(f, "text~{ts:?}"),
            Selector::TextMatches(re) => write!(f, "text=/{}/", re.as_str()),
            Selector::Desc(d) => write!(f, "desc={d:?}"),
            Selector::DescAny(ds) => write!(f, "desc~{ds:?}"),
            Selector::Id(id) => write!(f, "id={id:?}"),
            Selector::IdAny(ids) => write!(f, "id~{ids:?}"),
            Selector::Class(c) => write!(f, "class={c}"),
            Selector::Clickable => write!(f, "clickable"),
            Selector::All(parts) => {
                let joined: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}", joined.join(" & "))
            }
        }
    }
}

/// An in-memory screenshot owned by exactly one holder.
///
/// Backends release the underlying buffer in `Drop`, so an image is freed
/// once on every path its owner leaves.
pub trait ScreenImage: Sized {
    fn crop(&self, region: &Region) -> DeviceResult<Self>;
    fn save_png(&self, path: &Path) -> DeviceResult<()>;
}

/// Capabilities the engine needs from the device.
#[allow(async_fn_in_trait)]
pub trait Device {
    type Image: ScreenImage;

    fn screen_size(&self) -> ScreenSize;

    async fn is_screen_on(&self) -> DeviceResult<bool>;
    async fn is_locked(&self) -> DeviceResult<bool>;
    async fn wake_up(&self) -> DeviceResult<()>;
    /// Physical power-button equivalent.
    async fn press_power(&self) -> DeviceResult<()>;

    /// Waits up to `timeout` for a matching element.
    async fn find(&self, selector: &Selector, timeout: Duration) -> DeviceResult<Option<Element>>;
    async fn find_all(&self, selector: &Selector) -> DeviceResult<Vec<Element>>;
    async fn ancestor(&self, element: &Element, levels: u32) -> DeviceResult<Option<Element>>;
    /// Sibling at `offset` positions from `element` within its parent.
    async fn sibling(&self, element: &Element, offset: i32) -> DeviceResult<Option<Element>>;

    async fn exists(&self, selector: &Selector) -> DeviceResult<bool> {
        Ok(self.find(selector, Duration::ZERO).await?.is_some())
    }

    async fn click_element(&self, element: &Element) -> DeviceResult<bool>;
    async fn tap(&self, point: Point) -> DeviceResult<bool>;
    async fn swipe(&self, from: Point, to: Point, duration: Duration) -> DeviceResult<()>;
    async fn gesture(&self, duration: Duration, points: &[Point]) -> DeviceResult<()>;

    async fn set_overlay_visible(&self, visible: bool) -> DeviceResult<()>;
    async fn capture_screen(&self) -> DeviceResult<Self::Image>;

    async fn back(&self) -> DeviceResult<()>;
    async fn home(&self) -> DeviceResult<()>;
    async fn launch_app(&self, app_id: &str) -> DeviceResult<bool>;
    async fn open_app_settings(&self, app_id: &str) -> DeviceResult<()>;

    async fn music_volume(&self) -> DeviceResult<u32>;
    async fn set_music_volume(&self, volume: u32) -> DeviceResult<()>;
}
