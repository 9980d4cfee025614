//! Browser session driving the TodoMVC app
//!
//! Each `TodoPage` owns one WebDriver session, which is one isolated browser
//! context. `Locator` mirrors the "find lazily, wait, then act" style of
//! browser test frameworks: it stores a CSS chain and resolves it again on
//! every attempt, so re-renders between actions do not leave stale handles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tracing::debug;

use crate::driver::Browser;
use crate::error::{E2eError, E2eResult};
use crate::storage::{StorageReader, DEFAULT_STORAGE_KEY};
use crate::wait::{poll_until, PollPolicy, Probe};

/// WebDriver key code for Enter
const ENTER: &str = "\u{e007}";

/// Empties an input through the native setter so framework-controlled
/// inputs see an `input` event, then typing starts from a blank value.
const CLEAR_INPUT_JS: &str = r#"
const el = arguments[0];
const proto = el instanceof HTMLTextAreaElement
  ? HTMLTextAreaElement.prototype
  : HTMLInputElement.prototype;
Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, '');
el.dispatchEvent(new Event('input', { bubbles: true }));
"#;

/// Selectors for the parts of the app the scenarios touch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSelectors {
    pub new_todo: String,
    pub todo_item: String,
    pub todo_title: String,
    pub item_checkbox: String,
    pub item_edit: String,
    pub toggle_all_label: String,
    pub toggle_all_input: String,
    pub storage_key: String,
}

impl Default for AppSelectors {
    fn default() -> Self {
        Self {
            new_todo: "input[placeholder='What needs to be done?']".to_string(),
            todo_item: "[data-testid='todo-item']".to_string(),
            todo_title: "[data-testid='todo-title']".to_string(),
            item_checkbox: "input[type='checkbox']".to_string(),
            item_edit: "input[aria-label='Edit'], input.edit".to_string(),
            toggle_all_label: "label[for='toggle-all']".to_string(),
            toggle_all_input: "#toggle-all".to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// Browser session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Entry URL of the application under test
    pub base_url: String,
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// How long expectations and actionability checks keep retrying
    pub expect_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub selectors: AppSelectors,
}

impl BrowserConfig {
    pub fn expect_policy(&self) -> PollPolicy {
        PollPolicy::from_millis(self.expect_timeout_ms, self.poll_interval_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            base_url: "https://demo.playwright.dev/todomvc".to_string(),
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            expect_timeout_ms: 5000,
            poll_interval_ms: 100,
            selectors: AppSelectors::default(),
        }
    }
}

/// One browser session positioned on the app
pub struct TodoPage {
    driver: WebDriver,
    base_url: String,
    policy: PollPolicy,
    selectors: AppSelectors,
}

impl TodoPage {
    /// Open a fresh session against the WebDriver endpoint at `driver_url`
    pub async fn open(driver_url: &str, config: &BrowserConfig) -> E2eResult<Self> {
        let driver = match config.browser {
            Browser::Chromium => {
                let mut caps = DesiredCapabilities::chrome();
                if config.headless {
                    caps.set_headless()?;
                }
                caps.add_arg(&format!(
                    "--window-size={},{}",
                    config.viewport_width, config.viewport_height
                ))?;
                WebDriver::new(driver_url, caps).await?
            }
            Browser::Firefox => {
                let mut caps = DesiredCapabilities::firefox();
                if config.headless {
                    caps.set_headless()?;
                }
                WebDriver::new(driver_url, caps).await?
            }
            Browser::Webkit => WebDriver::new(driver_url, DesiredCapabilities::safari()).await?,
        };

        if config.browser != Browser::Chromium {
            driver
                .set_window_rect(0, 0, config.viewport_width, config.viewport_height)
                .await?;
        }

        Ok(Self {
            driver,
            base_url: config.base_url.clone(),
            policy: config.expect_policy(),
            selectors: config.selectors.clone(),
        })
    }

    /// Navigate to the application's entry URL
    pub async fn goto_app(&self) -> E2eResult<()> {
        debug!("goto {}", self.base_url);
        self.driver.goto(self.base_url.as_str()).await?;
        Ok(())
    }

    pub fn selectors(&self) -> &AppSelectors {
        &self.selectors
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn locator(&self, css: &str) -> Locator<'_> {
        Locator {
            driver: &self.driver,
            chain: vec![Segment {
                css: css.to_string(),
                nth: None,
            }],
            policy: self.policy,
        }
    }

    /// The "What needs to be done?" input
    pub fn new_todo_input(&self) -> Locator<'_> {
        self.locator(&self.selectors.new_todo)
    }

    /// All rendered item rows
    pub fn todo_items(&self) -> Locator<'_> {
        self.locator(&self.selectors.todo_item)
    }

    /// All rendered item titles
    pub fn todo_titles(&self) -> Locator<'_> {
        self.locator(&self.selectors.todo_title)
    }

    /// Completion checkbox inside an item row
    pub fn item_checkbox<'a>(&self, row: &Locator<'a>) -> Locator<'a> {
        row.locate(&self.selectors.item_checkbox)
    }

    /// Edit textbox inside an item row (present while editing)
    pub fn item_edit<'a>(&self, row: &Locator<'a>) -> Locator<'a> {
        row.locate(&self.selectors.item_edit)
    }

    /// Tick the "Mark all as complete" control
    pub async fn mark_all_complete(&self) -> E2eResult<()> {
        let input = self.locator(&self.selectors.toggle_all_input);
        if input.first().await?.is_selected().await? {
            return Ok(());
        }
        self.locator(&self.selectors.toggle_all_label).click().await?;
        input.wait_selected().await
    }

    pub async fn screenshot_png(&self) -> E2eResult<Vec<u8>> {
        Ok(self.driver.screenshot_as_png().await?)
    }

    /// End the session, discarding the browser context
    pub async fn close(self) -> E2eResult<()> {
        self.driver.quit().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageReader for TodoPage {
    async fn local_storage_item(&self, key: &str) -> E2eResult<Option<String>> {
        let ret = self
            .driver
            .execute(
                "return window.localStorage.getItem(arguments[0]);",
                vec![serde_json::json!(key)],
            )
            .await?;
        Ok(ret.json().as_str().map(str::to_string))
    }
}

#[derive(Debug, Clone)]
struct Segment {
    css: String,
    nth: Option<usize>,
}

/// Lazily resolved element query
#[derive(Clone)]
pub struct Locator<'a> {
    driver: &'a WebDriver,
    chain: Vec<Segment>,
    policy: PollPolicy,
}

impl<'a> Locator<'a> {
    /// Narrow to the element at `index` (zero-based) of the last segment
    pub fn nth(&self, index: usize) -> Locator<'a> {
        let mut next = self.clone();
        if let Some(last) = next.chain.last_mut() {
            last.nth = Some(index);
        }
        next
    }

    /// Elements matching `css` inside this locator's elements
    pub fn locate(&self, css: &str) -> Locator<'a> {
        let mut next = self.clone();
        next.chain.push(Segment {
            css: css.to_string(),
            nth: None,
        });
        next
    }

    /// Human-readable form used in step names and errors
    pub fn describe(&self) -> String {
        self.chain
            .iter()
            .map(|seg| match seg.nth {
                Some(n) => format!("{} >> nth={}", seg.css, n),
                None => seg.css.clone(),
            })
            .collect::<Vec<_>>()
            .join(" >> ")
    }

    /// Resolve the chain right now, without waiting
    pub async fn elements(&self) -> E2eResult<Vec<WebElement>> {
        let mut current: Vec<WebElement> = Vec::new();

        for (i, seg) in self.chain.iter().enumerate() {
            let mut found = Vec::new();
            if i == 0 {
                found = self.driver.find_all(By::Css(seg.css.as_str())).await?;
            } else {
                for parent in &current {
                    found.extend(parent.find_all(By::Css(seg.css.as_str())).await?);
                }
            }
            current = match seg.nth {
                Some(n) => found.into_iter().nth(n).into_iter().collect(),
                None => found,
            };
        }

        Ok(current)
    }

    /// Wait until at least one element matches and return the first
    pub async fn first(&self) -> E2eResult<WebElement> {
        let what = self.describe();
        poll_until(&what, &self.policy, move || async move {
            Ok(match self.elements().await {
                Ok(found) => match found.into_iter().next() {
                    Some(elem) => Probe::Ready(elem),
                    None => Probe::Pending("no matching element".to_string()),
                },
                Err(e) => Probe::Pending(e.to_string()),
            })
        })
        .await
        .map_err(|e| element_not_found(&what, e))
    }

    /// Replace the input's value with `text`
    pub async fn fill(&self, text: &str) -> E2eResult<()> {
        debug!("fill {} <- {:?}", self.describe(), text);
        let elem = self.first().await?;
        self.driver
            .execute(CLEAR_INPUT_JS, vec![elem.to_json()?])
            .await?;
        elem.send_keys(text).await?;
        Ok(())
    }

    pub async fn press_enter(&self) -> E2eResult<()> {
        debug!("press Enter on {}", self.describe());
        self.first().await?.send_keys(ENTER).await?;
        Ok(())
    }

    pub async fn click(&self) -> E2eResult<()> {
        debug!("click {}", self.describe());
        self.first().await?.click().await?;
        Ok(())
    }

    pub async fn dblclick(&self) -> E2eResult<()> {
        debug!("dblclick {}", self.describe());
        let elem = self.first().await?;
        self.driver
            .action_chain()
            .double_click_element(&elem)
            .perform()
            .await?;
        Ok(())
    }

    /// Tick a checkbox unless it already is, then wait for it to read checked
    pub async fn check(&self) -> E2eResult<()> {
        let elem = self.first().await?;
        if !elem.is_selected().await? {
            debug!("check {}", self.describe());
            elem.click().await?;
        }
        self.wait_selected().await
    }

    async fn wait_selected(&self) -> E2eResult<()> {
        let what = format!("{} to be checked", self.describe());
        poll_until(&what, &self.policy, move || async move {
            let selected = match self.elements().await?.first() {
                Some(elem) => elem.is_selected().await?,
                None => false,
            };
            Ok(if selected {
                Probe::Ready(())
            } else {
                Probe::Pending("unchecked".to_string())
            })
        })
        .await
        .map_err(|e| e.into_assertion("checked"))
    }

    /// Texts of all matched elements equal `expected`, in order
    pub async fn expect_texts(&self, expected: &[&str]) -> E2eResult<()> {
        let what = format!("text of {}", self.describe());
        poll_until(&what, &self.policy, move || async move {
            let texts = self.texts().await?;
            Ok(if texts_match(&texts, expected) {
                Probe::Ready(())
            } else {
                Probe::Pending(format!("{:?}", texts))
            })
        })
        .await
        .map_err(|e| e.into_assertion(format!("{:?}", expected)))
    }

    /// Element `i` carries class `expected[i]`, with exactly `expected.len()` elements
    pub async fn expect_classes(&self, expected: &[&str]) -> E2eResult<()> {
        let what = format!("classes of {}", self.describe());
        poll_until(&what, &self.policy, move || async move {
            let classes = self.class_attrs().await?;
            let matches = classes.len() == expected.len()
                && classes
                    .iter()
                    .zip(expected)
                    .all(|(actual, want)| has_class(actual, want));
            Ok(if matches {
                Probe::Ready(())
            } else {
                Probe::Pending(format!("{:?}", classes))
            })
        })
        .await
        .map_err(|e| e.into_assertion(format!("{:?}", expected)))
    }

    /// The first matched element carries class `expected`
    pub async fn expect_class(&self, expected: &str) -> E2eResult<()> {
        self.expect_first_class(expected, true).await
    }

    /// The first matched element does not carry class `unexpected`
    pub async fn expect_not_class(&self, unexpected: &str) -> E2eResult<()> {
        self.expect_first_class(unexpected, false).await
    }

    async fn expect_first_class(&self, class: &str, present: bool) -> E2eResult<()> {
        let what = format!("class of {}", self.describe());
        poll_until(&what, &self.policy, move || async move {
            let classes = self.class_attrs().await?;
            Ok(match classes.first() {
                Some(actual) if has_class(actual, class) == present => Probe::Ready(()),
                Some(actual) => Probe::Pending(format!("{:?}", actual)),
                None => Probe::Pending("no matching element".to_string()),
            })
        })
        .await
        .map_err(|e| {
            let expected = if present {
                format!("class {:?}", class)
            } else {
                format!("no class {:?}", class)
            };
            e.into_assertion(expected)
        })
    }

    /// The input's current value equals `expected`
    pub async fn expect_value(&self, expected: &str) -> E2eResult<()> {
        let what = format!("value of {}", self.describe());
        poll_until(&what, &self.policy, move || async move {
            let value = match self.elements().await?.first() {
                Some(elem) => elem.value().await?.unwrap_or_default(),
                None => return Ok(Probe::Pending("no matching element".to_string())),
            };
            Ok(if value == expected {
                Probe::Ready(())
            } else {
                Probe::Pending(format!("{:?}", value))
            })
        })
        .await
        .map_err(|e| e.into_assertion(format!("{:?}", expected)))
    }

    /// The input is empty
    pub async fn expect_empty(&self) -> E2eResult<()> {
        self.expect_value("").await
    }

    async fn texts(&self) -> E2eResult<Vec<String>> {
        let mut texts = Vec::new();
        for elem in self.elements().await? {
            texts.push(elem.text().await?);
        }
        Ok(texts)
    }

    async fn class_attrs(&self) -> E2eResult<Vec<String>> {
        let mut classes = Vec::new();
        for elem in self.elements().await? {
            classes.push(elem.class_name().await?.unwrap_or_default());
        }
        Ok(classes)
    }
}

/// An expired element wait keeps the last thing the driver said, so session
/// or transport failures stay visible behind the "not found".
fn element_not_found(what: &str, error: E2eError) -> E2eError {
    match error {
        E2eError::Timeout {
            last_observed: Some(last),
            ..
        } => E2eError::ElementNotFound(format!("{} (last observed: {})", what, last)),
        E2eError::Timeout { .. } => E2eError::ElementNotFound(what.to_string()),
        other => other,
    }
}

/// Rendered text is compared whitespace-trimmed
fn texts_match(actual: &[String], expected: &[&str]) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| a.trim() == e.trim())
}

fn has_class(class_attr: &str, class: &str) -> bool {
    class_attr.split_whitespace().any(|c| c == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("completed", "completed", true)]
    #[test_case("editing completed", "completed", true)]
    #[test_case("", "completed", false)]
    #[test_case("not-completed", "completed", false)]
    fn matches_class_tokens(attr: &str, class: &str, expected: bool) {
        assert_eq!(has_class(attr, class), expected);
    }

    #[test]
    fn compares_texts_in_order() {
        let actual = vec!["buy some cheese".to_string(), " feed the cat\n".to_string()];
        assert!(texts_match(&actual, &["buy some cheese", "feed the cat"]));
        assert!(!texts_match(&actual, &["feed the cat", "buy some cheese"]));
        assert!(!texts_match(&actual, &["buy some cheese"]));
    }

    #[test]
    fn expired_element_wait_keeps_last_driver_error() {
        let err = element_not_found(
            "[data-testid='todo-item']",
            E2eError::Timeout {
                what: "[data-testid='todo-item']".to_string(),
                after_ms: 5000,
                last_observed: Some("WebDriver error: invalid session id".to_string()),
            },
        );
        assert_eq!(
            err.to_string(),
            "Element not found: [data-testid='todo-item'] (last observed: WebDriver error: invalid session id)"
        );

        let plain = element_not_found(
            "#toggle-all",
            E2eError::Timeout {
                what: "#toggle-all".to_string(),
                after_ms: 5000,
                last_observed: None,
            },
        );
        assert_eq!(plain.to_string(), "Element not found: #toggle-all");

        let config = element_not_found("#toggle-all", E2eError::Config("bad".to_string()));
        assert!(matches!(config, E2eError::Config(_)));
    }

    #[test]
    fn default_selectors_target_reference_app() {
        let selectors = AppSelectors::default();
        assert_eq!(selectors.storage_key, "react-todos");
        assert!(selectors.todo_item.contains("todo-item"));
    }

    #[test]
    fn browser_config_from_partial_yaml() {
        let config: BrowserConfig = serde_yaml::from_str(
            "base_url: http://localhost:8080\nexpect_timeout_ms: 2000\nselectors:\n  storage_key: todos-vanilla\n",
        )
        .unwrap();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(config.expect_policy(), PollPolicy::from_millis(2000, 100));
        assert_eq!(config.selectors.storage_key, "todos-vanilla");
        assert_eq!(config.selectors.new_todo, AppSelectors::default().new_todo);
    }
}
