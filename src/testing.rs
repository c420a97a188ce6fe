//! Scripted device and detector doubles shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::detect::{DetectedTarget, Detector};
use crate::device::{
    Bounds, Device, DeviceResult, Element, Point, Region, ScreenImage, ScreenSize, Selector,
};
use crate::error::{DetectionError, DeviceError};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Wake,
    Power,
    Swipe { from: Point, to: Point },
    Gesture(Vec<Point>),
    Click(String),
    Tap(Point),
    Overlay(bool),
    Capture,
    Back,
    Home,
    Launch(String),
    OpenSettings(String),
    SetVolume(u32),
}

pub fn text_el(text: &str) -> Element {
    Element {
        text: text.into(),
        class: "android.widget.TextView".into(),
        enabled: true,
        clickable: true,
        ..Default::default()
    }
}

pub fn desc_el(desc: &str) -> Element {
    Element {
        desc: desc.into(),
        class: "android.widget.ImageView".into(),
        enabled: true,
        clickable: true,
        ..Default::default()
    }
}

pub fn button_el(text: &str) -> Element {
    Element {
        class: "android.widget.Button".into(),
        ..text_el(text)
    }
}

pub fn with_bounds(element: Element, bounds: Bounds) -> Element {
    Element { bounds, ..element }
}

fn label(element: &Element) -> String {
    if element.text.is_empty() {
        element.desc.clone()
    } else {
        element.text.clone()
    }
}

/// Counts images handed out and released by [`MockDevice::capture_screen`].
#[derive(Debug, Default)]
pub struct ImageLedger {
    pub created: Cell<usize>,
    pub released: Cell<usize>,
}

pub struct MockImage {
    ledger: Rc<ImageLedger>,
}

impl MockImage {
    fn new(ledger: &Rc<ImageLedger>) -> Self {
        ledger.created.set(ledger.created.get() + 1);
        Self {
            ledger: Rc::clone(ledger),
        }
    }
}

impl Drop for MockImage {
    fn drop(&mut self) {
        self.ledger.released.set(self.ledger.released.get() + 1);
    }
}

impl ScreenImage for MockImage {
    fn crop(&self, _region: &Region) -> DeviceResult<Self> {
        Ok(MockImage::new(&self.ledger))
    }

    fn save_png(&self, path: &Path) -> DeviceResult<()> {
        std::fs::write(path, b"\x89PNG")?;
        Ok(())
    }
}

/// Mutable screen model. Reactions receive it when their element is clicked.
#[derive(Default)]
pub struct Screen {
    pub elements: Vec<Element>,
    pub locked: bool,
    pub screen_on: bool,
    /// Taps since the last capture.
    pub taps: Vec<Point>,
}

impl Screen {
    pub fn show(&mut self, element: Element) {
        self.elements.push(element);
    }
}

type Reaction = Box<dyn Fn(&mut Screen)>;

pub struct MockDevice {
    size: ScreenSize,
    screen: RefCell<Screen>,
    events: RefCell<Vec<Event>>,
    reactions: RefCell<Vec<(String, Reaction)>>,
    ancestors: RefCell<Vec<(String, Element)>>,
    failing: RefCell<Vec<String>>,
    pin: RefCell<Option<String>>,
    entered: RefCell<String>,
    pattern: RefCell<Option<Vec<Point>>>,
    swipe_unlocks: Cell<bool>,
    wake_works: Cell<bool>,
    volume: Cell<u32>,
    pub images: Rc<ImageLedger>,
}

impl MockDevice {
    /// Unlocked, screen on, 1080x2400, empty screen.
    pub fn new() -> Self {
        Self {
            size: ScreenSize::new(1080, 2400),
            screen: RefCell::new(Screen {
                screen_on: true,
                ..Default::default()
            }),
            events: RefCell::new(Vec::new()),
            reactions: RefCell::new(Vec::new()),
            ancestors: RefCell::new(Vec::new()),
            failing: RefCell::new(Vec::new()),
            pin: RefCell::new(None),
            entered: RefCell::new(String::new()),
            pattern: RefCell::new(None),
            swipe_unlocks: Cell::new(false),
            wake_works: Cell::new(true),
            volume: Cell::new(7),
            images: Rc::new(ImageLedger::default()),
        }
    }

    pub fn locked(self) -> Self {
        self.screen.borrow_mut().locked = true;
        self
    }

    pub fn screen_off(self) -> Self {
        self.screen.borrow_mut().screen_on = false;
        self
    }

    pub fn wake_broken(self) -> Self {
        self.wake_works.set(false);
        self
    }

    pub fn with_pin(self, pin: &str) -> Self {
        *self.pin.borrow_mut() = Some(pin.to_string());
        self
    }

    pub fn with_pattern(self, points: Vec<Point>) -> Self {
        *self.pattern.borrow_mut() = Some(points);
        self
    }

    pub fn swipe_unlocks(self) -> Self {
        self.swipe_unlocks.set(true);
        self
    }

    pub fn with_elements(self, elements: Vec<Element>) -> Self {
        self.screen.borrow_mut().elements.extend(elements);
        self
    }

    /// Runs `reaction` whenever an element labelled `label_text` is clicked.
    pub fn on_click(self, label_text: &str, reaction: impl Fn(&mut Screen) + 'static) -> Self {
        self.reactions
            .borrow_mut()
            .push((label_text.to_string(), Box::new(reaction)));
        self
    }

    /// `ancestor()` of an element labelled `label_text` returns `parent`.
    pub fn with_ancestor(self, label_text: &str, parent: Element) -> Self {
        self.ancestors
            .borrow_mut()
            .push((label_text.to_string(), parent));
        self
    }

    /// Queries whose selector mentions `fragment` fail with a device error.
    pub fn failing_on(self, fragment: &str) -> Self {
        self.failing.borrow_mut().push(fragment.to_string());
        self
    }

    pub fn with_volume(self, volume: u32) -> Self {
        self.volume.set(volume);
        self
    }

    pub fn is_locked_now(&self) -> bool {
        self.screen.borrow().locked
    }

    pub fn volume_now(&self) -> u32 {
        self.volume.get()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn clicked_labels(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Click(l) => Some(l.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn check_failing(&self, selector: &Selector) -> DeviceResult<()> {
        let rendered = selector.to_string();
        if self.failing.borrow().iter().any(|f| rendered.contains(f.as_str())) {
            return Err(DeviceError::Disconnected(format!("query {rendered} failed")));
        }
        Ok(())
    }
}

impl Device for MockDevice {
    type Image = MockImage;

    fn screen_size(&self) -> ScreenSize {
        self.size
    }

    async fn is_screen_on(&self) -> DeviceResult<bool> {
        Ok(self.screen.borrow().screen_on)
    }

    async fn is_locked(&self) -> DeviceResult<bool> {
        Ok(self.screen.borrow().locked)
    }

    async fn wake_up(&self) -> DeviceResult<()> {
        self.record(Event::Wake);
        if self.wake_works.get() {
            self.screen.borrow_mut().screen_on = true;
        }
        Ok(())
    }

    async fn press_power(&self) -> DeviceResult<()> {
        self.record(Event::Power);
        let mut screen = self.screen.borrow_mut();
        screen.screen_on = !screen.screen_on;
        Ok(())
    }

    async fn find(&self, selector: &Selector, _timeout: Duration) -> DeviceResult<Option<Element>> {
        self.check_failing(selector)?;
        Ok(self
            .screen
            .borrow()
            .elements
            .iter()
            .find(|e| selector.matches(e))
            .cloned())
    }

    async fn find_all(&self, selector: &Selector) -> DeviceResult<Vec<Element>> {
        self.check_failing(selector)?;
        Ok(self
            .screen
            .borrow()
            .elements
            .iter()
            .filter(|e| selector.matches(e))
            .cloned()
            .collect())
    }

    async fn ancestor(&self, element: &Element, _levels: u32) -> DeviceResult<Option<Element>> {
        let wanted = label(element);
        Ok(self
            .ancestors
            .borrow()
            .iter()
            .find(|(l, _)| *l == wanted)
            .map(|(_, parent)| parent.clone()))
    }

    async fn sibling(&self, element: &Element, offset: i32) -> DeviceResult<Option<Element>> {
        let screen = self.screen.borrow();
        let Some(index) = screen.elements.iter().position(|e| e == element) else {
            return Ok(None);
        };
        let target = index as i64 + i64::from(offset);
        if target < 0 {
            return Ok(None);
        }
        Ok(screen.elements.get(target as usize).cloned())
    }

    async fn click_element(&self, element: &Element) -> DeviceResult<bool> {
        let clicked = label(element);
        self.record(Event::Click(clicked.clone()));

        if let Some(pin) = self.pin.borrow().as_ref() {
            if element.desc.len() == 1 {
                let mut entered = self.entered.borrow_mut();
                entered.push_str(&element.desc);
                if entered.ends_with(pin.as_str()) {
                    self.screen.borrow_mut().locked = false;
                }
            }
        }

        let reactions = self.reactions.borrow();
        let mut screen = self.screen.borrow_mut();
        for (l, reaction) in reactions.iter() {
            if *l == clicked {
                reaction(&mut screen);
            }
        }
        Ok(true)
    }

    async fn tap(&self, point: Point) -> DeviceResult<bool> {
        self.record(Event::Tap(point));
        self.screen.borrow_mut().taps.push(point);
        Ok(true)
    }

    async fn swipe(&self, from: Point, to: Point, _duration: Duration) -> DeviceResult<()> {
        self.record(Event::Swipe { from, to });
        if self.swipe_unlocks.get() {
            self.screen.borrow_mut().locked = false;
        }
        Ok(())
    }

    async fn gesture(&self, _duration: Duration, points: &[Point]) -> DeviceResult<()> {
        self.record(Event::Gesture(points.to_vec()));
        if self.pattern.borrow().as_deref() == Some(points) {
            self.screen.borrow_mut().locked = false;
        }
        Ok(())
    }

    async fn set_overlay_visible(&self, visible: bool) -> DeviceResult<()> {
        self.record(Event::Overlay(visible));
        Ok(())
    }

    async fn capture_screen(&self) -> DeviceResult<MockImage> {
        self.record(Event::Capture);
        self.screen.borrow_mut().taps.clear();
        Ok(MockImage::new(&self.images))
    }

    async fn back(&self) -> DeviceResult<()> {
        self.record(Event::Back);
        Ok(())
    }

    async fn home(&self) -> DeviceResult<()> {
        self.record(Event::Home);
        Ok(())
    }

    async fn launch_app(&self, app_id: &str) -> DeviceResult<bool> {
        self.record(Event::Launch(app_id.to_string()));
        Ok(true)
    }

    async fn open_app_settings(&self, app_id: &str) -> DeviceResult<()> {
        self.record(Event::OpenSettings(app_id.to_string()));
        Ok(())
    }

    async fn music_volume(&self) -> DeviceResult<u32> {
        Ok(self.volume.get())
    }

    async fn set_music_volume(&self, volume: u32) -> DeviceResult<()> {
        self.record(Event::SetVolume(volume));
        self.volume.set(volume);
        Ok(())
    }
}

/// Detector answering from a queue; an exhausted queue answers `[]`.
#[derive(Default)]
pub struct MockDetector {
    answers: RefCell<VecDeque<Result<Vec<DetectedTarget>, DetectionError>>>,
    pub calls: Cell<usize>,
}

impl MockDetector {
    pub fn answering(answers: Vec<Result<Vec<DetectedTarget>, DetectionError>>) -> Self {
        Self {
            answers: RefCell::new(answers.into()),
            calls: Cell::new(0),
        }
    }
}

impl Detector for MockDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedTarget>, DetectionError> {
        self.calls.set(self.calls.get() + 1);
        assert!(image_path.exists(), "detector got a path that was never written");
        self.answers
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
