use relay::app::{Backends, RelayApp};
use relay::chat::ComposerInput;
use relay::locale::Locale;
use relay::settings::ClientSettingsStore;
use snafu::{ResultExt, Whatever};

/// Headless walkthrough against the in-memory backend: sign up, say hello, read the reply.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        tracing::error!(%error, "demo session failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Whatever> {
    let settings = ClientSettingsStore::load();
    tracing::info!(path = %settings.config_path().display(), "client settings loaded");

    let app = RelayApp::start(&settings, Backends::in_memory())
        .whatever_context("failed to start relay")?;
    app.status()
        .record_visit()
        .await
        .whatever_context("failed to record visit")?;

    let mut wizard = app.signup_wizard();
    let model = app.settings().default_model.clone();
    let steps = [
        wizard.submit_credentials("demo@relay.dev", "relay-demo", "relay-demo"),
        wizard.submit_profile("Demo User", "demo"),
        wizard.submit_preferences(&model, Locale::En),
    ];
    if let Some(issue) = steps.into_iter().find_map(Result::err) {
        snafu::whatever!("signup form rejected: {issue:?}");
    }
    let profile = app
        .onboarding()
        .complete_signup(&wizard)
        .await
        .whatever_context("failed to complete signup")?;
    app.sync_identity()
        .whatever_context("failed to bind signed-in user")?;
    tracing::info!(uid = %profile.uid, unique_id = %profile.unique_id, "demo user signed up");

    let receipt = app
        .chat()
        .send_message(ComposerInput::text("Hello"))
        .await
        .whatever_context("failed to send message")?;
    let outcome = app
        .chat()
        .wait_for_reply()
        .await
        .whatever_context("reply failed")?;
    tracing::info!(session_id = %receipt.session_id, ?outcome, "reply settled");

    for message in app.chat().stream().messages() {
        tracing::info!(role = ?message.role, content = message.content_str(), "message");
    }
    Ok(())
}
