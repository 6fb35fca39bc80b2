//! Chrome/Chromium actuator over the DevTools protocol.
//!
//! All CDP calls block, so each one runs on the blocking pool against a
//! shared `Arc<Tab>`.
use std::ffi::OsStr;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::browser::tab::point::Point as CdpPoint;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};

use crate::config::BrowserConfig;
use crate::errors::{MarksmanError, MarksmanResult};
use crate::executor::actuator::{Actuator, ClickTarget, ScrollDirection};
use crate::perception::types::{ElementRecord, Point};

/// Collect visible interactive elements, descending into open shadow roots
/// with an explicit worklist. Returns a JSON string.
const SCAN_JS: &str = r#"
(() => {
  const SELECTOR = [
    'button', 'a', 'input', 'textarea', 'select',
    '[role="button"]', '[role="link"]', '[role="checkbox"]', '[role="menuitem"]',
    '[role="menuitemcheckbox"]', '[role="option"]', '[role="tab"]', '[role="treeitem"]',
    '[tabindex]:not([tabindex="-1"])', 'li', 'div[onclick]', 'span[onclick]', 'svg'
  ].join(',');
  const NATIVE = new Set(['button', 'a', 'input', 'textarea', 'select']);
  const out = [];
  const work = [document];
  while (work.length) {
    const root = work.pop();
    for (const el of root.querySelectorAll('*')) {
      if (el.shadowRoot) work.push(el.shadowRoot);
    }
    for (const el of root.querySelectorAll(SELECTOR)) {
      const r = el.getBoundingClientRect();
      if (r.width <= 5 || r.height <= 5) continue;
      const s = getComputedStyle(el);
      if (s.visibility === 'hidden' || s.display === 'none' || s.opacity === '0') continue;
      const tag = el.tagName.toLowerCase();
      const aria = el.getAttribute('aria-label');
      let text = (el.innerText || el.value || aria || el.getAttribute('title') || '')
        .replace(/\s+/g, ' ').trim();
      if (!text && tag === 'svg') text = 'icon';
      const role = el.getAttribute('role');
      if (!text && !NATIVE.has(tag) && !role) continue;
      out.push({
        index: out.length,
        tagName: tag,
        text: text.slice(0, 50),
        id: el.id || null,
        placeholder: el.getAttribute('placeholder'),
        type: el.getAttribute('type'),
        ariaLabel: aria,
        role: role,
        rect: { x: r.x, y: r.y, width: r.width, height: r.height }
      });
    }
  }
  return JSON.stringify(out);
})()
"#;

const FOCUSED_CENTER_JS: &str = r#"
(() => {
  const el = document.activeElement;
  if (!el || el === document.body || el === document.documentElement) return JSON.stringify(null);
  const r = el.getBoundingClientRect();
  return JSON.stringify({ x: r.x + r.width / 2, y: r.y + r.height / 2 });
})()
"#;

const CURSOR_MARKER_MS: u32 = 1000;
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

fn text_center_js(text: &str) -> MarksmanResult<String> {
    let needle = serde_json::to_string(&text.to_lowercase())?;
    Ok(format!(
        r#"
(() => {{
  const needle = {needle};
  let best = null, bestArea = Infinity;
  for (const el of document.querySelectorAll('body *')) {{
    const t = (el.innerText || el.getAttribute('aria-label') || '').toLowerCase();
    if (!t.includes(needle)) continue;
    const r = el.getBoundingClientRect();
    const area = r.width * r.height;
    if (r.width <= 0 || r.height <= 0 || area >= bestArea) continue;
    best = el; bestArea = area;
  }}
  if (!best) return JSON.stringify(null);
  best.scrollIntoView({{ block: 'center', inline: 'center' }});
  const r = best.getBoundingClientRect();
  return JSON.stringify({{ x: r.x + r.width / 2, y: r.y + r.height / 2 }});
}})()
"#
    ))
}

fn cursor_js(p: Point) -> String {
    format!(
        r#"
(() => {{
  const dot = document.createElement('div');
  dot.style.cssText = 'position:fixed;left:{x}px;top:{y}px;width:20px;height:20px;margin:-10px 0 0 -10px;'
    + 'border-radius:50%;background:rgba(255,0,0,0.8);border:2px solid #fff;'
    + 'z-index:2147483647;pointer-events:none;';
  document.documentElement.appendChild(dot);
  setTimeout(() => dot.remove(), {ms});
  return true;
}})()
"#,
        x = p.x,
        y = p.y,
        ms = CURSOR_MARKER_MS
    )
}

fn cdp<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> MarksmanError {
    move |e| MarksmanError::Actuator(format!("{what}: {e}"))
}

/// Evaluate a script that returns `JSON.stringify(...)` and parse the result.
fn eval_json(tab: &Tab, js: &str) -> MarksmanResult<serde_json::Value> {
    let obj = tab.evaluate(js, false).map_err(cdp("evaluate"))?;
    let raw = obj
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .ok_or_else(|| MarksmanError::Actuator("script returned no string".into()))?;
    Ok(serde_json::from_str(raw)?)
}

fn center_from(value: serde_json::Value, what: &str) -> MarksmanResult<CdpPoint> {
    match (value["x"].as_f64(), value["y"].as_f64()) {
        (Some(x), Some(y)) => Ok(CdpPoint { x, y }),
        _ => Err(MarksmanError::Actuator(format!("{what}: no matching element"))),
    }
}

fn click_at(tab: &Tab, p: CdpPoint) -> MarksmanResult<()> {
    tab.click_point(p).map_err(cdp("click"))?;
    Ok(())
}

/// Clear and fill `selector`, falling back to keyboard typing after focusing it.
fn fill(tab: &Tab, selector: &str, text: &str) -> MarksmanResult<()> {
    let el = tab.find_element(selector).map_err(cdp("find element"))?;
    el.click().map_err(cdp("focus"))?;
    let sel = serde_json::to_string(selector)?;
    let value = serde_json::to_string(text)?;
    let filled = eval_json(
        tab,
        &format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el || !('value' in el)) return JSON.stringify(false);
  el.value = {value};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return JSON.stringify(true);
}})()"#
        ),
    )?;
    if filled.as_bool() != Some(true) {
        tracing::debug!(selector, "fill not possible, typing with keyboard");
        tab.type_str(text).map_err(cdp("type"))?;
    }
    Ok(())
}

pub struct ChromeActuator {
    config: BrowserConfig,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeActuator {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            browser: None,
            tab: None,
        }
    }

    fn tab(&self) -> MarksmanResult<Arc<Tab>> {
        self.tab
            .clone()
            .ok_or_else(|| MarksmanError::Actuator("browser not started".into()))
    }

    /// Run `f` against the tab on the blocking pool. The returned future does
    /// not borrow `self`.
    fn with_tab<T, F>(&self, f: F) -> impl Future<Output = MarksmanResult<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> MarksmanResult<T> + Send + 'static,
    {
        let tab = self.tab();
        async move { on_tab(tab?, f).await }
    }
}

async fn on_tab<T, F>(tab: Arc<Tab>, f: F) -> MarksmanResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Tab) -> MarksmanResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&tab))
        .await
        .map_err(|e| MarksmanError::Actuator(format!("join: {e}")))?
}

#[async_trait]
impl Actuator for ChromeActuator {
    async fn start(&mut self) -> MarksmanResult<()> {
        if self.tab.is_some() {
            return Ok(());
        }
        let profile = self.config.profile_dir();
        std::fs::create_dir_all(&profile)?;
        let cfg = self.config.clone();

        let (browser, tab) = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions {
                headless: cfg.headless,
                window_size: Some((cfg.viewport_width, cfg.viewport_height)),
                path: cfg.chrome_path.clone(),
                user_data_dir: Some(profile),
                args: vec![
                    OsStr::new("--no-first-run"),
                    OsStr::new("--no-default-browser-check"),
                    OsStr::new("--disable-blink-features=AutomationControlled"),
                    OsStr::new("--disable-infobars"),
                ],
                idle_browser_timeout: IDLE_TIMEOUT,
                ..Default::default()
            };
            let browser = Browser::new(options).map_err(cdp("launch"))?;
            let tab = browser.new_tab().map_err(cdp("new tab"))?;
            Ok::<_, MarksmanError>((browser, tab))
        })
        .await
        .map_err(|e| MarksmanError::Actuator(format!("join: {e}")))??;

        tracing::info!(
            headless = self.config.headless,
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            "browser started"
        );
        self.browser = Some(browser);
        self.tab = Some(tab);
        Ok(())
    }

    async fn stop(&mut self) -> MarksmanResult<()> {
        self.tab = None;
        if let Some(browser) = self.browser.take() {
            // Dropping the handle terminates the browser process.
            tokio::task::spawn_blocking(move || drop(browser))
                .await
                .map_err(|e| MarksmanError::Actuator(format!("join: {e}")))?;
            tracing::info!("browser stopped");
        }
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> MarksmanResult<()> {
        let url = url.to_string();
        tracing::info!(url = %url, "navigating");
        self.with_tab(move |tab| {
            tab.navigate_to(&url).map_err(cdp("navigate"))?;
            tab.wait_until_navigated().map_err(cdp("wait for navigation"))?;
            Ok(())
        })
        .await
    }

    async fn capture_screenshot(&mut self) -> MarksmanResult<Vec<u8>> {
        self.with_tab(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(cdp("screenshot"))
        })
        .await
    }

    async fn scan_interactive_elements(&mut self) -> MarksmanResult<Vec<ElementRecord>> {
        self.with_tab(|tab| {
            let value = eval_json(tab, SCAN_JS).map_err(|e| MarksmanError::Scan(e.to_string()))?;
            serde_json::from_value(value).map_err(|e| MarksmanError::Scan(e.to_string()))
        })
        .await
    }

    async fn current_url(&mut self) -> MarksmanResult<String> {
        self.with_tab(|tab| Ok(tab.get_url())).await
    }

    async fn click(&mut self, target: &ClickTarget) -> MarksmanResult<()> {
        let target = target.clone();
        self.with_tab(move |tab| match target {
            ClickTarget::Point(p) => click_at(tab, CdpPoint { x: p.x, y: p.y }),
            ClickTarget::Selector(sel) => {
                let el = tab.find_element(&sel).map_err(cdp("find element"))?;
                el.click().map_err(cdp("click"))?;
                Ok(())
            }
            ClickTarget::Text(text) => {
                let center = center_from(eval_json(tab, &text_center_js(&text)?)?, "text click")?;
                click_at(tab, center)
            }
            ClickTarget::Focused => {
                let center = center_from(eval_json(tab, FOCUSED_CENTER_JS)?, "focused click")?;
                click_at(tab, center)
            }
        })
        .await
    }

    async fn type_text(&mut self, text: &str, selector: Option<&str>) -> MarksmanResult<()> {
        let text = text.to_string();
        let selector = selector.map(str::to_string);
        self.with_tab(move |tab| match selector {
            Some(sel) => fill(tab, &sel, &text).or_else(|e| {
                tracing::warn!(selector = %sel, error = %e, "fill failed, typing at focus");
                tab.type_str(&text).map(|_| ()).map_err(cdp("type"))
            }),
            None => tab.type_str(&text).map(|_| ()).map_err(cdp("type")),
        })
        .await
    }

    async fn press_key(&mut self, key: &str) -> MarksmanResult<()> {
        let key = key.to_string();
        self.with_tab(move |tab| tab.press_key(&key).map(|_| ()).map_err(cdp("press key")))
            .await
    }

    async fn scroll(&mut self, direction: ScrollDirection, amount: u32) -> MarksmanResult<()> {
        let dy = match direction {
            ScrollDirection::Up => -(amount as i64),
            ScrollDirection::Down => amount as i64,
        };
        self.with_tab(move |tab| {
            tab.evaluate(&format!("window.scrollBy(0, {dy})"), false)
                .map_err(cdp("scroll"))?;
            Ok(())
        })
        .await
    }

    async fn show_transient_cursor(&mut self, point: Point) -> MarksmanResult<()> {
        self.with_tab(move |tab| {
            tab.evaluate(&cursor_js(point), false).map_err(cdp("cursor"))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lookup_script_escapes_needle() {
        let js = text_center_js("Say \"hi\"").unwrap();
        assert!(js.contains(r#"const needle = "say \"hi\"";"#));
    }

    #[test]
    fn cursor_script_positions_marker() {
        let js = cursor_js(Point { x: 140.0, y: 120.5 });
        assert!(js.contains("left:140px;top:120.5px"));
        assert!(js.contains("setTimeout(() => dot.remove(), 1000)"));
    }

    #[test]
    fn center_requires_both_coordinates() {
        let p = center_from(serde_json::json!({"x": 1.5, "y": 2.0}), "t").unwrap();
        assert_eq!((p.x, p.y), (1.5, 2.0));
        assert!(center_from(serde_json::Value::Null, "t").is_err());
    }

    #[tokio::test]
    async fn calls_before_start_are_errors() {
        let mut act = ChromeActuator::new(BrowserConfig::default());
        assert!(matches!(act.capture_screenshot().await, Err(MarksmanError::Actuator(_))));
        act.stop().await.unwrap();
    }
}
