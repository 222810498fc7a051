//! DOM introspection probes.
//!
//! Two JavaScript probes produce robust locator candidates for recorded
//! interactions: the focus probe describes the active element (and its
//! ancestor chain, stepping out of shadow roots), the click probe finds the
//! topmost actionable element under a point. Both return JSON and are run
//! across every frame, first non-null result wins.

use serde_json::Value;

use super::driver::PageDriver;

/// Describes `document.activeElement`: tag, role, accessible name, CSS path,
/// ordered locator candidates, and up to 8 ancestors.
pub const FOCUS_PROBE_JS: &str = r#"
() => {
    const doc = document;
    const active = doc.activeElement;
    if (!active || active === doc.body || active === doc.documentElement) {
        return null;
    }

    const getRole = (el) => {
        if (!el || el.nodeType !== 1) return null;
        const explicit = el.getAttribute && el.getAttribute("role");
        if (explicit) return explicit;
        const tag = el.tagName ? el.tagName.toLowerCase() : "";
        if (tag === "a" && el.getAttribute("href")) return "link";
        if (["button", "summary", "details"].includes(tag)) return "button";
        if (["input", "textarea", "select"].includes(tag)) return "textbox";
        return null;
    };

    const textFromIds = (ids) => {
        if (!ids) return "";
        const parts = [];
        ids.split(" ").forEach((id) => {
            const ref = doc.getElementById(id);
            if (ref) {
                const t = (ref.innerText || ref.textContent || "").trim();
                if (t) parts.push(t);
            }
        });
        return parts.join(" ");
    };

    const accessibleName = (el) => {
        if (!el) return null;
        const ariaLabel = el.getAttribute && el.getAttribute("aria-label");
        if (ariaLabel && ariaLabel.trim()) return ariaLabel.trim().slice(0, 200);
        const labelled = textFromIds(el.getAttribute && el.getAttribute("aria-labelledby"));
        if (labelled) return labelled.slice(0, 200);
        if (el.id) {
            const lab = doc.querySelector(`label[for="${el.id.replace(/"/g, '\\"')}"]`);
            if (lab) {
                const t = (lab.innerText || lab.textContent || "").trim();
                if (t) return t.slice(0, 200);
            }
        }
        const wrapping = el.closest && el.closest("label");
        if (wrapping) {
            const t = (wrapping.innerText || wrapping.textContent || "").trim();
            if (t) return t.slice(0, 200);
        }
        for (const attr of ["title", "placeholder", "alt"]) {
            const v = el.getAttribute && el.getAttribute(attr);
            if (v && v.trim()) return v.trim().slice(0, 200);
        }
        const text = (el.innerText || el.textContent || "").trim();
        return text ? text.slice(0, 200) : null;
    };

    const cssPath = (el) => {
        if (!el || el.nodeType !== 1) return null;
        const parts = [];
        let node = el;
        let depth = 0;
        while (node && node.nodeType === 1 && depth < 8) {
            let selector = node.tagName ? node.tagName.toLowerCase() : "element";
            if (node.id) {
                parts.unshift(selector + `#${node.id}`);
                break;
            }
            if (node.classList && node.classList.length) {
                selector += "." + Array.from(node.classList).slice(0, 3).join(".");
            }
            const parent = node.parentElement;
            if (parent) {
                const siblings = Array.from(parent.children).filter(n => n.tagName === node.tagName);
                if (siblings.length > 1) {
                    selector += `:nth-of-type(${siblings.indexOf(node) + 1})`;
                }
            }
            parts.unshift(selector);
            const root = node.getRootNode && node.getRootNode();
            node = parent || (root && root.host) || null;
            depth++;
        }
        return parts.join(" > ");
    };

    const buildCandidates = (el) => {
        const cands = [];
        if (!el || el.nodeType !== 1) return cands;
        const id = el.id && el.id.trim();
        const dti = el.getAttribute && el.getAttribute("data-testid");
        const dqa = el.getAttribute && el.getAttribute("data-qa");
        const name = el.getAttribute && el.getAttribute("name");
        const role = getRole(el);
        const aname = accessibleName(el);

        if (id) cands.push({ by: "css", value: `#${id}` });
        if (dti) cands.push({ by: "css", value: `[data-testid="${dti}"]` });
        if (dqa) cands.push({ by: "css", value: `[data-qa="${dqa}"]` });
        if (name && /^(input|textarea|select)$/i.test(el.tagName)) {
            cands.push({ by: "css", value: `${el.tagName.toLowerCase()}[name="${name}"]` });
        }
        if (role && aname) cands.push({ by: "role", role, name: aname });
        const path = cssPath(el);
        if (path) cands.push({ by: "css", value: path });
        return cands;
    };

    const describeNode = (el) => {
        if (!el || el.nodeType !== 1) return null;
        const valuePreview = typeof el.value === "string" && el.value.trim()
            ? el.value.trim().slice(0, 120) : null;
        return {
            tag: el.tagName ? el.tagName.toLowerCase() : "element",
            role: getRole(el),
            name: accessibleName(el),
            ariaLabel: el.getAttribute && el.getAttribute("aria-label"),
            placeholder: el.getAttribute ? el.getAttribute("placeholder") : null,
            valuePreview,
            selector: cssPath(el),
            candidates: buildCandidates(el)
        };
    };

    const hierarchy = [];
    const seen = new Set();
    let node = active;
    while (node && node.nodeType === 1 && !seen.has(node)) {
        seen.add(node);
        const info = describeNode(node);
        if (info) hierarchy.push(info);
        if (node.parentElement) {
            node = node.parentElement;
            continue;
        }
        const root = node.getRootNode?.();
        if (root && root.host) {
            node = root.host;
            continue;
        }
        break;
    }

    if (!hierarchy.length) return null;
    const top = hierarchy[0];
    return {
        tag: top.tag,
        role: top.role || null,
        name: top.name || null,
        ariaLabel: top.ariaLabel || null,
        placeholder: top.placeholder || null,
        valuePreview: top.valuePreview || null,
        selector: top.selector || null,
        candidates: top.candidates || [],
        primaryLocator: (top.candidates && top.candidates[0]) || null,
        hierarchy: hierarchy.slice(0, 8).map((n) => n.selector || n.tag)
    };
}
"#;

/// Describes the topmost actionable element at a point: the raw element, its
/// actionable ancestor, a `bestSelector`, `primaryLocator`, and the ordered
/// `selectorCandidates`.
pub const CLICK_PROBE_JS: &str = r#"
(x, y) => {
    const doc = document;

    const getRole = (el) => {
        if (!el || el.nodeType !== 1) return null;
        const explicit = el.getAttribute && el.getAttribute("role");
        if (explicit) return explicit;
        const tag = el.tagName ? el.tagName.toLowerCase() : "";
        if (tag === "a" && el.getAttribute("href")) return "link";
        if (["button", "summary", "details"].includes(tag)) return "button";
        if (tag === "input") {
            const type = (el.getAttribute("type") || "").toLowerCase();
            if (["button", "submit", "reset", "checkbox", "radio", "file"].includes(type)) return "button";
            return "textbox";
        }
        if (["select", "textarea"].includes(tag)) return "textbox";
        return null;
    };

    const textFromIds = (ids) => {
        if (!ids) return "";
        const parts = [];
        ids.split(" ").forEach((id) => {
            const ref = doc.getElementById(id);
            if (ref) {
                const t = (ref.innerText || ref.textContent || "").trim();
                if (t) parts.push(t);
            }
        });
        return parts.join(" ");
    };

    const accessibleName = (el) => {
        if (!el) return null;
        const ariaLabel = el.getAttribute && el.getAttribute("aria-label");
        if (ariaLabel && ariaLabel.trim()) return ariaLabel.trim().slice(0, 200);
        const labelled = textFromIds(el.getAttribute && el.getAttribute("aria-labelledby"));
        if (labelled) return labelled.slice(0, 200);
        if (el.id) {
            const lab = doc.querySelector(`label[for="${el.id.replace(/"/g, '\\"')}"]`);
            if (lab) {
                const t = (lab.innerText || lab.textContent || "").trim();
                if (t) return t.slice(0, 200);
            }
        }
        const wrapping = el.closest && el.closest("label");
        if (wrapping) {
            const t = (wrapping.innerText || wrapping.textContent || "").trim();
            if (t) return t.slice(0, 200);
        }
        const title = el.getAttribute && el.getAttribute("title");
        if (title && title.trim()) return title.trim().slice(0, 200);
        const text = (el.innerText || el.textContent || "").trim();
        return text ? text.slice(0, 200) : null;
    };

    const cssPath = (el) => {
        if (!el || el.nodeType !== 1) return null;
        const parts = [];
        let node = el;
        let depth = 0;
        while (node && node.nodeType === 1 && depth < 8) {
            let selector = node.tagName ? node.tagName.toLowerCase() : "element";
            if (node.id) {
                parts.unshift(selector + `#${node.id}`);
                break;
            }
            if (node.classList && node.classList.length) {
                selector += "." + Array.from(node.classList).slice(0, 3).join(".");
            }
            const parent = node.parentElement;
            if (parent) {
                const siblings = Array.from(parent.children).filter(n => n.tagName === node.tagName);
                if (siblings.length > 1) {
                    selector += `:nth-of-type(${siblings.indexOf(node) + 1})`;
                }
            }
            parts.unshift(selector);
            const root = node.getRootNode && node.getRootNode();
            node = parent || (root && root.host) || null;
            depth++;
        }
        return parts.join(" > ");
    };

    const buildCandidates = (el) => {
        const cands = [];
        if (!el || el.nodeType !== 1) return cands;
        const id = el.id && el.id.trim();
        const dti = el.getAttribute && el.getAttribute("data-testid");
        const dqa = el.getAttribute && el.getAttribute("data-qa");
        const role = getRole(el);
        const aname = accessibleName(el);

        if (id) cands.push({ by: "css", value: `#${id}` });
        if (dti) cands.push({ by: "css", value: `[data-testid="${dti}"]` });
        if (dqa) cands.push({ by: "css", value: `[data-qa="${dqa}"]` });
        if (role && aname) cands.push({ by: "role", role, name: aname });
        const path = cssPath(el);
        if (path) cands.push({ by: "css", value: path });
        return cands;
    };

    const isActionable = (el) => {
        if (!el || el.nodeType !== 1) return false;
        const tag = el.tagName ? el.tagName.toLowerCase() : "";
        if (["button", "summary", "details", "label"].includes(tag)) return true;
        if (tag === "a" && el.getAttribute("href")) return true;
        if (tag === "input") {
            const type = (el.getAttribute("type") || "").toLowerCase();
            if (["button", "submit", "reset", "checkbox", "radio", "file"].includes(type)) return true;
        }
        const role = el.getAttribute && el.getAttribute("role");
        if (role && ["button", "link", "tab", "switch", "menuitem", "option", "checkbox"].includes(role)) return true;
        if (el.getAttribute && (el.getAttribute("onclick") || el.getAttribute("href") || el.getAttribute("for"))) return true;
        const style = window.getComputedStyle(el);
        if (style && style.cursor === "pointer") return true;
        return false;
    };

    const list = (doc.elementsFromPoint ? doc.elementsFromPoint(x, y) : [doc.elementFromPoint(x, y)]).filter(Boolean);
    if (!list.length) return null;
    const element = list[0];
    let actionable = element;
    for (const el of list) {
        if (isActionable(el)) { actionable = el; break; }
    }
    while (actionable && actionable !== doc.body && !isActionable(actionable)) {
        actionable = actionable.parentElement;
    }

    const summarize = (el) => {
        if (!el) return null;
        return {
            tag: el.tagName ? el.tagName.toLowerCase() : null,
            role: getRole(el),
            name: accessibleName(el),
            cssPath: cssPath(el),
            label: accessibleName(el),
            type: el.getAttribute ? el.getAttribute("type") : null,
            candidates: buildCandidates(el)
        };
    };

    const info = {
        element: summarize(element),
        actionable: summarize(actionable || element),
        clickable: !!(actionable && actionable !== element),
    };
    const preferred = (info.actionable && info.actionable.candidates && info.actionable.candidates.length)
        ? info.actionable
        : info.element;

    const candidates = (preferred && preferred.candidates) ? preferred.candidates : [];
    const primary = candidates[0] || null;

    info.bestSelector = (primary && primary.by === "css") ? primary.value : (preferred ? preferred.cssPath : null);
    info.selectorCandidates = candidates;
    info.primaryLocator = primary;
    return info;
}
"#;

fn non_null(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

/// Run the focus probe on every frame, main frame first. The first frame
/// whose document has a focused element wins; per-frame failures are
/// swallowed (cross-origin frames routinely reject evaluation).
pub async fn describe_focused_element(page: &PageDriver) -> Option<Value> {
    let expression = format!("({})()", FOCUS_PROBE_JS);
    if let Ok(value) = page.evaluate(&expression).await {
        if let Some(found) = non_null(value) {
            return Some(found);
        }
    }
    let frames = page.frame_tree().await.ok()?;
    for frame in frames.iter().filter(|f| !f.is_main) {
        match page.evaluate_in_frame(&frame.id, &expression).await {
            Ok(value) => {
                if let Some(found) = non_null(value) {
                    return Some(found);
                }
            }
            Err(e) => tracing::trace!("Focus probe skipped frame {}: {}", frame.url, e),
        }
    }
    None
}

/// Run the click probe at main-frame viewport coordinates.
pub async fn describe_click_target(page: &PageDriver, x: f64, y: f64) -> Option<Value> {
    let expression = format!("({})({}, {})", CLICK_PROBE_JS, x, y);
    match page.evaluate(&expression).await {
        Ok(value) => non_null(value),
        Err(e) => {
            tracing::trace!("Click probe failed: {}", e);
            None
        }
    }
}
