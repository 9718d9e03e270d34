use std::collections::BTreeMap;

use gloo::console;
use gloo::dialogs::alert;
use gloo::timers::callback::Timeout;
use gloo_net::http::{Request, Response};
use serde::Deserialize;
use thiserror::Error;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::spawn_local;
use web_sys::{Element, HtmlInputElement, HtmlSelectElement};
use yew::prelude::*;

/// Base URL of the activities API. Empty means same-origin, which is the
/// normal deployment; point it at e.g. http://127.0.0.1:8000 for local dev
/// against a separately served backend. A trailing slash is tolerated.
const API_BASE: &str = "";

/// How long a signup notice stays visible before it fades out.
const NOTICE_HIDE_MS: u32 = 5_000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Activity {
    description: String,
    schedule: String,
    max_participants: u32,
    participants: Vec<String>,
}

impl Activity {
    /// Always derived from the last fetch, never stored. Signed so an
    /// overbooked activity shows a negative count instead of wrapping.
    fn spots_left(&self) -> i64 {
        i64::from(self.max_participants) - self.participants.len() as i64
    }
}

/// The full collection as the server sends it: one object keyed by activity
/// name, replaced wholesale on every fetch.
type ActivityMap = BTreeMap<String, Activity>;

#[derive(Debug, Deserialize)]
struct SignupOk {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ServerDetail {
    detail: Option<String>,
}

#[derive(Debug, Error)]
enum ApiError {
    #[error("request never reached the server")]
    Network,
    #[error("response body was not valid JSON")]
    Malformed,
    #[error("server rejected the request (HTTP {status})")]
    Server { status: u16, detail: Option<String> },
}

fn api_url(path: &str) -> String {
    format!("{}{}", API_BASE.trim_end_matches('/'), path)
}

/// POST and DELETE share one URL shape; both parameters are percent-encoded.
fn signup_url(activity: &str, email: &str) -> String {
    api_url(&format!(
        "/activities/{}/signup?email={}",
        urlencoding::encode(activity),
        urlencoding::encode(email)
    ))
}

async fn server_error(resp: Response) -> ApiError {
    let status = resp.status();
    // Best effort: the error body is {"detail": ...} when the server sent one.
    let detail = resp
        .json::<ServerDetail>()
        .await
        .ok()
        .and_then(|body| body.detail);
    ApiError::Server { status, detail }
}

async fn fetch_activities() -> Result<ActivityMap, ApiError> {
    let resp = Request::get(&api_url("/activities"))
        .send()
        .await
        .map_err(|_| ApiError::Network)?;
    resp.json::<ActivityMap>()
        .await
        .map_err(|_| ApiError::Malformed)
}

async fn post_signup(activity: &str, email: &str) -> Result<String, ApiError> {
    let resp = Request::post(&signup_url(activity, email))
        .send()
        .await
        .map_err(|_| ApiError::Network)?;
    if !resp.ok() {
        return Err(server_error(resp).await);
    }
    let body: SignupOk = resp.json().await.map_err(|_| ApiError::Malformed)?;
    Ok(body.message)
}

async fn delete_signup(activity: &str, email: &str) -> Result<(), ApiError> {
    let resp = Request::delete(&signup_url(activity, email))
        .send()
        .await
        .map_err(|_| ApiError::Network)?;
    if !resp.ok() {
        return Err(server_error(resp).await);
    }
    Ok(())
}

/// Escape text for interpolation into card markup. Covers the five characters
/// that can change HTML structure; everything else passes through.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Short 1-2 character avatar label for a participant. Decorative only.
/// Emails use the part before the @; the base is split on runs of
/// non-alphanumeric characters and the first letters of the first two
/// fragments win, falling back to the first two characters of the base.
fn initials(who: &str) -> String {
    if who.is_empty() {
        return "?".to_string();
    }
    let base = match who.split_once('@') {
        Some((before, _)) => before,
        None => who,
    };
    let mut fragments = base
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|f| !f.is_empty());
    match (fragments.next(), fragments.next()) {
        (Some(a), Some(b)) => {
            let mut label = String::new();
            label.extend(a.chars().take(1));
            label.extend(b.chars().take(1));
            label.to_uppercase()
        }
        (Some(a), None) => a.chars().take(2).collect::<String>().to_uppercase(),
        (None, _) => base.chars().take(2).collect::<String>().to_uppercase(),
    }
}

fn participant_rows(activity_name: &str, participants: &[String]) -> String {
    if participants.is_empty() {
        return r#"<li class="no-participants">No participants yet</li>"#.to_string();
    }
    participants
        .iter()
        .map(|p| {
            format!(
                concat!(
                    r#"<li><span class="avatar">{initials}</span>"#,
                    r#"<span class="participant-text">{email}</span>"#,
                    r#"<button class="participant-delete" data-activity="{activity}" data-email="{email}" title="Remove">&#x2716;</button></li>"#,
                ),
                initials = escape_html(&initials(p)),
                email = escape_html(p),
                activity = escape_html(activity_name),
            )
        })
        .collect()
}

/// One activity card as a markup string. Pure so the rendering rules are
/// testable off-browser; the component injects the result as raw HTML and
/// every interpolated value has been escaped above.
fn activity_card_markup(name: &str, activity: &Activity) -> String {
    format!(
        concat!(
            "<h4>{name}</h4>",
            "<p>{description}</p>",
            "<p><strong>Schedule:</strong> {schedule}</p>",
            "<p><strong>Availability:</strong> {spots} spots left</p>",
            r#"<div class="participants"><h5>Participants</h5>"#,
            r#"<ul class="participants-list">{rows}</ul></div>"#,
        ),
        name = escape_html(name),
        description = escape_html(&activity.description),
        schedule = escape_html(&activity.schedule),
        spots = activity.spots_left(),
        rows = participant_rows(name, &activity.participants),
    )
}

#[derive(Clone, PartialEq)]
enum NoticeKind {
    Success,
    Error,
}

#[derive(Clone, PartialEq)]
struct Notice {
    kind: NoticeKind,
    text: String,
}

impl Notice {
    fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    fn class(&self) -> &'static str {
        match self.kind {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
        }
    }
}

#[function_component(App)]
fn app() -> Html {
    // None until the first fetch settles, after which each successful refresh
    // replaces the whole map. A failed refresh leaves the map untouched and
    // raises the failure flag instead.
    let activities = use_state(|| None::<ActivityMap>);
    let load_failed = use_state(|| false);
    let notice = use_state(|| None::<Notice>);
    let submitting = use_state(|| false);
    let email = use_state(String::new);
    let selected = use_state(String::new);

    let refresh = {
        let activities = activities.clone();
        let load_failed = load_failed.clone();
        let selected = selected.clone();
        Callback::from(move |_: ()| {
            let activities = activities.clone();
            let load_failed = load_failed.clone();
            let selected = selected.clone();
            spawn_local(async move {
                match fetch_activities().await {
                    Ok(map) => {
                        // Drop a stale selection if its activity disappeared.
                        if !selected.is_empty() && !map.contains_key(&*selected) {
                            selected.set(String::new());
                        }
                        load_failed.set(false);
                        activities.set(Some(map));
                    }
                    Err(err) => {
                        console::error!(format!("Error fetching activities: {err}"));
                        load_failed.set(true);
                    }
                }
            });
        })
    };

    // Initial load on mount.
    {
        let refresh = refresh.clone();
        use_effect_with((), move |_| {
            refresh.emit(());
            || ()
        });
    }

    let show_notice = {
        let notice = notice.clone();
        Callback::from(move |n: Notice| {
            notice.set(Some(n));
            let notice = notice.clone();
            Timeout::new(NOTICE_HIDE_MS, move || notice.set(None)).forget();
        })
    };

    // One delegated handler for every delete button in the rendered cards,
    // keyed off the data-activity / data-email attributes.
    let on_list_click = {
        let refresh = refresh.clone();
        Callback::from(move |e: MouseEvent| {
            let target = match e.target().and_then(|t| t.dyn_into::<Element>().ok()) {
                Some(el) => el,
                None => return,
            };
            let button = match target.closest(".participant-delete") {
                Ok(Some(el)) => el,
                _ => return,
            };
            let (activity, email) = match (
                button.get_attribute("data-activity"),
                button.get_attribute("data-email"),
            ) {
                (Some(a), Some(m)) => (a, m),
                _ => return,
            };

            // Keep the button dead while the request runs; a successful
            // refresh re-renders the list without it, a failure re-arms it.
            let _ = button.set_attribute("disabled", "disabled");

            let refresh = refresh.clone();
            spawn_local(async move {
                match delete_signup(&activity, &email).await {
                    Ok(()) => refresh.emit(()),
                    Err(err) => {
                        console::error!(format!("Failed to remove participant: {err}"));
                        let _ = button.remove_attribute("disabled");
                        let message = match err {
                            ApiError::Server {
                                detail: Some(detail),
                                ..
                            } => detail,
                            ApiError::Network => {
                                "Network error while removing participant".to_string()
                            }
                            _ => "Failed to remove participant".to_string(),
                        };
                        alert(&message);
                    }
                }
            });
        })
    };

    let on_submit = {
        let email = email.clone();
        let selected = selected.clone();
        let submitting = submitting.clone();
        let show_notice = show_notice.clone();
        let refresh = refresh.clone();
        Callback::from(move |e: SubmitEvent| {
            e.prevent_default();
            let address = (*email).clone();
            let activity = (*selected).clone();
            submitting.set(true);

            let email = email.clone();
            let selected = selected.clone();
            let submitting = submitting.clone();
            let show_notice = show_notice.clone();
            let refresh = refresh.clone();
            spawn_local(async move {
                match post_signup(&activity, &address).await {
                    Ok(message) => {
                        show_notice.emit(Notice::success(message));
                        email.set(String::new());
                        selected.set(String::new());
                        refresh.emit(());
                    }
                    Err(err) => {
                        console::error!(format!("Error signing up: {err}"));
                        let text = match err {
                            ApiError::Server {
                                detail: Some(detail),
                                ..
                            } => detail,
                            ApiError::Server { detail: None, .. } => "An error occurred".to_string(),
                            ApiError::Network | ApiError::Malformed => {
                                "Failed to sign up. Please try again.".to_string()
                            }
                        };
                        show_notice.emit(Notice::error(text));
                    }
                }
                submitting.set(false);
            });
        })
    };

    let on_email_input = {
        let email = email.clone();
        Callback::from(move |e: InputEvent| {
            let input: HtmlInputElement = e.target_unchecked_into();
            email.set(input.value());
        })
    };

    let on_activity_change = {
        let selected = selected.clone();
        Callback::from(move |e: Event| {
            let select: HtmlSelectElement = e.target_unchecked_into();
            selected.set(select.value());
        })
    };

    let option_names: Vec<String> = (*activities)
        .as_ref()
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();

    let list = if *load_failed {
        html! { <p class="load-error">{ "Failed to load activities. Please try again later." }</p> }
    } else if let Some(map) = (*activities).as_ref() {
        html! {
            <>
                { for map.iter().map(|(name, activity)| html! {
                    <div class="activity-card" key={name.clone()}>
                        { Html::from_html_unchecked(AttrValue::from(activity_card_markup(name, activity))) }
                    </div>
                }) }
            </>
        }
    } else {
        html! { <p class="loading">{ "Loading activities..." }</p> }
    };

    html! {
        <main class="wrap">
            <header>
                <h1>{ "Activity Signup Board" }</h1>
                <p class="tagline">{ "Browse what's on offer and sign up with your email." }</p>
            </header>

            <section class="signup">
                <h3>{ "Sign Up" }</h3>
                <form id="signup-form" onsubmit={on_submit}>
                    <label for="email">{ "Email" }</label>
                    <input
                        id="email"
                        type="email"
                        required=true
                        placeholder="your-email@example.com"
                        value={(*email).clone()}
                        oninput={on_email_input}
                        disabled={*submitting}
                    />
                    <label for="activity">{ "Activity" }</label>
                    <select id="activity" required=true onchange={on_activity_change} disabled={*submitting}>
                        <option value="" selected={selected.is_empty()}>{ "-- Select an activity --" }</option>
                        { for option_names.iter().map(|name| html! {
                            <option value={name.clone()} selected={*name == *selected}>{ name.clone() }</option>
                        }) }
                    </select>
                    <button type="submit" disabled={*submitting}>{ "Sign Up" }</button>
                </form>
                {
                    if let Some(n) = (*notice).clone() {
                        html! { <div id="message" class={n.class()}>{ n.text }</div> }
                    } else {
                        html! {}
                    }
                }
            </section>

            <section class="activities">
                <h3>{ "Activities" }</h3>
                <div id="activities-list" onclick={on_list_click}>
                    { list }
                </div>
            </section>
        </main>
    }
}

fn main() {
    yew::Renderer::<App>::new().render();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(max: u32, participants: &[&str]) -> Activity {
        Activity {
            description: "Weekly meetup".to_string(),
            schedule: "Fridays, 3:30 PM".to_string(),
            max_participants: max,
            participants: participants.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn spots_left_is_capacity_minus_signups() {
        assert_eq!(activity(12, &["a@x", "b@x", "c@x"]).spots_left(), 9);
        assert_eq!(activity(2, &["a@x", "b@x"]).spots_left(), 0);
    }

    #[test]
    fn spots_left_goes_negative_when_overbooked() {
        assert_eq!(activity(1, &["a@x", "b@x"]).spots_left(), -1);
    }

    #[test]
    fn escape_html_neutralizes_all_five_specials() {
        assert_eq!(escape_html("O'Brien & <Co>"), "O&#39;Brien &amp; &lt;Co&gt;");
        assert_eq!(escape_html(r#"say "hi""#), "say &quot;hi&quot;");
    }

    #[test]
    fn escape_html_leaves_safe_text_alone() {
        assert_eq!(escape_html("plain text 123"), "plain text 123");
    }

    #[test]
    fn initials_from_email_local_part() {
        assert_eq!(initials("jane.doe@example.com"), "JD");
    }

    #[test]
    fn initials_from_single_word() {
        assert_eq!(initials("bob"), "BO");
    }

    #[test]
    fn initials_for_empty_input() {
        assert_eq!(initials(""), "?");
    }

    #[test]
    fn initials_collapse_separator_runs() {
        assert_eq!(initials("mary--jane@school.edu"), "MJ");
        assert_eq!(initials("a_b_c"), "AB");
    }

    #[test]
    fn initials_fall_back_to_raw_base_without_fragments() {
        assert_eq!(initials("--"), "--");
    }

    #[test]
    fn empty_activity_renders_placeholder_and_no_delete_buttons() {
        let markup = activity_card_markup("Chess Club", &activity(12, &[]));
        assert_eq!(markup.matches("no-participants").count(), 1);
        assert_eq!(markup.matches("participant-delete").count(), 0);
        assert!(markup.contains("No participants yet"));
    }

    #[test]
    fn populated_activity_renders_one_delete_button_per_participant() {
        let markup = activity_card_markup(
            "Chess Club",
            &activity(12, &["jane.doe@x.com", "bob@x.com"]),
        );
        assert_eq!(markup.matches("participant-delete").count(), 2);
        assert_eq!(markup.matches("no-participants").count(), 0);
        assert!(markup.contains(r#"<span class="avatar">JD</span>"#));
    }

    #[test]
    fn card_shows_derived_spots_left() {
        let markup = activity_card_markup(
            "Chess Club",
            &activity(12, &["a@x.com", "b@x.com", "c@x.com"]),
        );
        assert!(markup.contains("9 spots left"));
    }

    #[test]
    fn card_escapes_injected_markup() {
        let mut act = activity(5, &["<script>alert(1)</script>@x.com"]);
        act.description = "Tools & <tricks>".to_string();
        let markup = activity_card_markup(r#"Art & "Design""#, &act);
        assert!(!markup.contains("<script>"));
        assert!(markup.contains("Art &amp; &quot;Design&quot;"));
        assert!(markup.contains("Tools &amp; &lt;tricks&gt;"));
    }

    #[test]
    fn delete_button_attributes_are_escaped() {
        let markup = participant_rows(r#"A "B""#, &["x@y.com".to_string()]);
        assert!(markup.contains(r#"data-activity="A &quot;B&quot;""#));
        assert!(markup.contains(r#"data-email="x@y.com""#));
    }

    #[test]
    fn signup_url_percent_encodes_both_parameters() {
        assert_eq!(
            signup_url("Chess Club", "a+b@x.com"),
            "/activities/Chess%20Club/signup?email=a%2Bb%40x.com"
        );
    }

    #[test]
    fn activity_map_decodes_server_shape() {
        let body = r#"{
            "Chess Club": {
                "description": "Learn strategies and tactics",
                "schedule": "Fridays, 3:30 PM - 5:00 PM",
                "max_participants": 12,
                "participants": ["michael@mergington.edu", "daniel@mergington.edu"]
            }
        }"#;
        let map: ActivityMap = serde_json::from_str(body).unwrap();
        let act = &map["Chess Club"];
        assert_eq!(act.spots_left(), 10);
        assert_eq!(act.participants[0], "michael@mergington.edu");
    }
}
