use super::*;

fn list_args() -> ListArgs {
    ListArgs {
        tab: InboxTab::All,
        category: None,
        priority: None,
        search: None,
        date_from: None,
        date_to: None,
        skip: None,
        limit: None,
        json: false,
    }
}

#[test]
fn signal_error_is_only_built_explicitly() {
    let err = CliError::Signal(std::io::Error::other("handler install failed"));
    assert_eq!(err.to_string(), "signal handling failed: handler install failed");
}

#[test]
fn json_errors_keep_their_own_message() {
    let err: CliError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert!(err.to_string().starts_with("invalid JSON payload"));
}

#[test]
fn list_filters_default_to_inbox_page() {
    let filters = list_filters(list_args());
    assert_eq!(filters.limit, Some(100));
    assert_eq!(filters.status, None);
    assert_eq!(filters.search, None);
}

#[test]
fn list_filters_combine_tab_and_flags() {
    let args = ListArgs {
        tab: InboxTab::Unread,
        priority: Some(Priority::High),
        search: Some("  claim ".into()),
        limit: Some(25),
        ..list_args()
    };
    let filters = list_filters(args);
    assert_eq!(filters.status, Some(EmailStatus::Unread));
    assert_eq!(filters.priority, Some(Priority::High));
    assert_eq!(filters.search.as_deref(), Some("claim"));
    assert_eq!(filters.limit, Some(25));
}

#[test]
fn cli_parses_nested_commands() {
    let cli = Cli::try_parse_from(["medmail", "--api-url", "http://x/api", "emails", "status", "e1", "archived"]).unwrap();
    assert_eq!(cli.api_url.as_deref(), Some("http://x/api"));
    assert!(matches!(
        cli.command,
        Command::Emails(EmailsCommand { command: EmailsSubcommand::Status { ref email_id, status: EmailStatus::Archived } })
            if email_id == "e1"
    ));
}
