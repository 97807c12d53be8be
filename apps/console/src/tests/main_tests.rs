use super::*;

#[test]
fn plain_text_is_a_prompt() {
    assert_eq!(
        parse_command("what is rust?"),
        Ok(Command::Prompt("what is rust?".into()))
    );
}

#[test]
fn commands_parse_ids_and_titles() {
    assert_eq!(parse_command("/open 12"), Ok(Command::Open(ConversationId(12))));
    assert_eq!(
        parse_command("/rename 3   Trip plans"),
        Ok(Command::Rename(ConversationId(3), "Trip plans".into()))
    );
    assert_eq!(parse_command("/rm 4"), Ok(Command::Delete(ConversationId(4))));
    assert_eq!(parse_command("/quit"), Ok(Command::Quit));
}

#[test]
fn bad_arguments_are_reported() {
    assert!(parse_command("/open abc").is_err());
    assert!(parse_command("/rename 3").is_err());
    assert!(parse_command("/frobnicate").is_err());
}

#[test]
fn flags_override_loaded_settings() {
    let args = Args::parse_from([
        "console",
        "--api-url",
        "http://backend:9000",
        "--reveal-interval-ms",
        "0",
    ]);
    let mut settings = ClientSettings::default();

    args.apply(&mut settings);

    assert_eq!(settings.api_base_url, "http://backend:9000");
    assert_eq!(settings.reveal_interval_ms, 0);
    assert_eq!(settings.auth_token, None);
}
