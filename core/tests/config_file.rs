//! Configuration loading from real files.

use std::fs;
use std::path::PathBuf;

use fmgateway_core::{Config, Protocol};

fn temp_ini(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("fmgateway-{}-{}", name, std::process::id()));
    fs::write(&path, contents).expect("failed to write ini");
    path
}

#[test]
fn test_full_configuration_file() {
    let path = temp_ini(
        "full",
        "[General]\n\
         Callsign=G9BF\n\
         Protocol=IAX\n\
         Debug=0\n\
         Daemon=0\n\
         \n\
         [Log]\n\
         DisplayLevel=3\n\
         \n\
         [MQTT]\n\
         Address=127.0.0.1\n\
         Port=1883\n\
         \n\
         [Network]\n\
         LocalAddress=127.0.0.1\n\
         LocalPort=3810\n\
         RptAddress=192.168.0.20\n\
         RptPort=3710\n\
         \n\
         [IAX Network]\n\
         RemoteAddress=iax.example.net\n\
         RemotePort=4569\n\
         Username=allstar\n\
         Password=\"secret pass\"\n\
         Node=41759\n",
    );

    let config = Config::read(&path).expect("config read failed");
    let _ = fs::remove_file(&path);

    assert_eq!(config.callsign, "G9BF");
    assert_eq!(config.protocol, Protocol::Iax);
    assert_eq!(config.log_display_level, 3);
    assert_eq!(config.network_rpt_address, "192.168.0.20");
    assert_eq!(config.network_rpt_port, 3710);
    assert_eq!(config.iax_remote_address, "iax.example.net");
    assert_eq!(config.iax_password, "secret pass");
    assert_eq!(config.iax_node, "41759");
}

#[test]
fn test_missing_file_is_an_error() {
    let result = Config::read(std::path::Path::new("/nonexistent/FMGateway.ini"));
    assert!(result.is_err());
}

#[test]
fn test_incomplete_selected_protocol_fails_validation() {
    // USRP selected but its remote port never set.
    let path = temp_ini(
        "incomplete",
        "[General]\nCallsign=G9BF\nProtocol=USRP\n\
         [Network]\nRptPort=3710\n",
    );

    let result = Config::read(&path);
    let _ = fs::remove_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_unselected_protocol_sections_are_not_validated() {
    // IAX credentials absent, but the USRP protocol is selected.
    let path = temp_ini(
        "usrp-only",
        "[General]\nCallsign=G9BF\nProtocol=USRP\n\
         [Network]\nRptPort=3710\n\
         [USRP Network]\nRemotePort=34001\n",
    );

    let config = Config::read(&path).expect("config read failed");
    let _ = fs::remove_file(&path);
    assert_eq!(config.protocol, Protocol::Usrp);
    assert_eq!(config.usrp_remote_port, 34001);
}
