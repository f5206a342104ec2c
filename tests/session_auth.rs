mod common;

use common::*;
use mysqlx_wire::protocol::frame::client_msg;
use mysqlx_wire::protocol::wire::FieldReader;
use mysqlx_wire::{AuthSelection, Error, Session, SessionOpts};

fn opts(auth: AuthSelection) -> SessionOpts {
    SessionOpts {
        user: "app".into(),
        password: Some("secret".into()),
        schema: Some("main".into()),
        auth,
        ..SessionOpts::default()
    }
}

/// Mechanism name from an `AuthenticateStart` payload.
fn mech_name(payload: &[u8]) -> String {
    let mut reader = FieldReader::new(payload);
    while let Some(field) = reader.next().unwrap() {
        if field.tag == 1 {
            return field.value.as_str().unwrap().to_owned();
        }
    }
    panic!("AuthenticateStart without a mechanism name");
}

#[test]
fn insecure_default_is_challenge_response() {
    let transport = ScriptedTransport::new().server(mysql41_auth_script());
    let log = transport.log();

    let session = Session::establish(transport, opts(AuthSelection::Auto)).unwrap();
    assert!(session.is_valid());

    let frames = log.frames();
    assert_eq!(frames[0].0, client_msg::SESS_AUTHENTICATE_START);
    assert_eq!(mech_name(&frames[0].1), "MYSQL41");
    assert_eq!(frames[1].0, client_msg::SESS_AUTHENTICATE_CONTINUE);
}

#[test]
fn secure_default_is_plain() {
    let transport = ScriptedTransport::new()
        .secure(true)
        .server(plain_auth_script());
    let log = transport.log();

    let session = Session::establish(transport, opts(AuthSelection::Auto)).unwrap();
    assert!(session.is_valid());

    let frames = log.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(mech_name(&frames[0].1), "PLAIN");
}

#[test]
fn auto_falls_back_once_and_clears_diagnostics() {
    let transport = ScriptedTransport::new()
        .server(error_frame(1045, "Access denied", false))
        .server(plain_auth_script());
    let log = transport.log();

    let session = Session::establish(transport, opts(AuthSelection::Auto)).unwrap();
    assert!(session.is_valid());
    // The first attempt's rejection was cleared before the retry.
    assert!(session.diagnostics().is_empty());

    let mechs: Vec<String> = log
        .frames()
        .iter()
        .filter(|(t, _)| *t == client_msg::SESS_AUTHENTICATE_START)
        .map(|(_, p)| mech_name(p))
        .collect();
    assert_eq!(mechs, ["MYSQL41", "PLAIN"]);
}

#[test]
fn manual_selection_never_falls_back() {
    let transport = ScriptedTransport::new().server(error_frame(1045, "Access denied", false));
    let log = transport.log();

    let err = Session::establish(transport, opts(AuthSelection::Mysql41)).unwrap_err();
    match err {
        Error::Server(err) => assert_eq!(err.code, 1045),
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(log.frames().len(), 1);
}

#[test]
fn exhausted_fallback_names_both_mechanisms() {
    let transport = ScriptedTransport::new()
        .server(error_frame(1045, "Access denied", false))
        .server(error_frame(1045, "Access denied", false));

    let err = Session::establish(transport, opts(AuthSelection::Auto)).unwrap_err();
    match err {
        Error::Auth(message) => {
            assert!(message.contains("PLAIN"));
            assert!(message.contains("MYSQL41"));
        }
        other => panic!("expected auth error, got {:?}", other),
    }
}
