//! Tests end-to-end du control point contre une passerelle IGD simulée:
//! un répondeur SSDP UDP et un serveur HTTP minimal servant la description
//! de device et le endpoint de contrôle SOAP, avec une table NAT en mémoire.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pmogateway::{GatewayConfig, GatewayControlPoint, GatewayError, PortMappingProtocol};

const EXTERNAL_IP: &str = "203.0.113.17";
const IGD_DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:InternetGatewayDevice:1";

#[derive(Clone, Copy)]
enum SsdpMode {
    /// Réponse M-SEARCH complète avec LOCATION
    Announce,
    /// Réponse avec ST rootdevice mais sans LOCATION
    MissingLocation,
    /// Aucune réponse
    Silent,
}

struct MockIgd {
    ssdp_target: SocketAddr,
    msearch_count: Arc<AtomicUsize>,
    control_hits: Arc<AtomicUsize>,
    mappings: Arc<Mutex<HashSet<(u16, String)>>>,
}

impl MockIgd {
    fn start(ssdp_mode: SsdpMode, device_type: &str) -> Self {
        let msearch_count = Arc::new(AtomicUsize::new(0));
        let control_hits = Arc::new(AtomicUsize::new(0));
        let mappings = Arc::new(Mutex::new(HashSet::new()));

        let http_port = start_http_server(
            device_type.to_string(),
            Arc::clone(&control_hits),
            Arc::clone(&mappings),
        );
        let ssdp_target = start_ssdp_responder(ssdp_mode, http_port, Arc::clone(&msearch_count));

        Self {
            ssdp_target,
            msearch_count,
            control_hits,
            mappings,
        }
    }

    fn control_point(&self) -> GatewayControlPoint {
        GatewayControlPoint::with_config(GatewayConfig {
            ssdp_target: self.ssdp_target,
            discovery_timeout: Duration::from_millis(500),
            soap_timeout: Duration::from_secs(5),
            local_ip: Some(Ipv4Addr::LOCALHOST),
        })
    }

    fn msearches(&self) -> usize {
        self.msearch_count.load(Ordering::SeqCst)
    }

    fn has_mapping(&self, port: u16, protocol: &str) -> bool {
        self.mappings
            .lock()
            .unwrap()
            .contains(&(port, protocol.to_string()))
    }
}

fn start_ssdp_responder(
    mode: SsdpMode,
    http_port: u16,
    msearch_count: Arc<AtomicUsize>,
) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let target = socket.local_addr().unwrap();

    thread::spawn(move || {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf) else {
                return;
            };
            if !String::from_utf8_lossy(&buf[..n]).starts_with("M-SEARCH") {
                continue;
            }
            msearch_count.fetch_add(1, Ordering::SeqCst);

            let response = match mode {
                SsdpMode::Silent => continue,
                SsdpMode::MissingLocation => "HTTP/1.1 200 OK\r\n\
                     CACHE-CONTROL: max-age=1800\r\n\
                     EXT:\r\n\
                     ST: upnp:rootdevice\r\n\
                     USN: uuid:igd-mock::upnp:rootdevice\r\n\r\n"
                    .to_string(),
                SsdpMode::Announce => format!(
                    "HTTP/1.1 200 OK\r\n\
                     CACHE-CONTROL: max-age=1800\r\n\
                     EXT:\r\n\
                     LOCATION: http://127.0.0.1:{}/desc.xml\r\n\
                     SERVER: Mock/1.0 UPnP/1.0 IGD/1.0\r\n\
                     ST: upnp:rootdevice\r\n\
                     USN: uuid:igd-mock::upnp:rootdevice\r\n\r\n",
                    http_port
                ),
            };
            let _ = socket.send_to(response.as_bytes(), from);
        }
    });

    target
}

fn start_http_server(
    device_type: String,
    control_hits: Arc<AtomicUsize>,
    mappings: Arc<Mutex<HashSet<(u16, String)>>>,
) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { return };
            let device_type = device_type.clone();
            let control_hits = Arc::clone(&control_hits);
            let mappings = Arc::clone(&mappings);
            thread::spawn(move || {
                if let Some((request_line, body)) = read_http_request(&mut stream) {
                    handle_http_request(
                        &mut stream,
                        &request_line,
                        &body,
                        &device_type,
                        &control_hits,
                        &mappings,
                    );
                }
            });
        }
    });

    port
}

fn read_http_request(stream: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let request_line = headers.lines().next().unwrap_or_default().to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..header_end + content_length]).to_string();
    Some((request_line, body))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn handle_http_request(
    stream: &mut TcpStream,
    request_line: &str,
    body: &str,
    device_type: &str,
    control_hits: &AtomicUsize,
    mappings: &Mutex<HashSet<(u16, String)>>,
) {
    if request_line.starts_with("GET /desc.xml") {
        write_http_response(stream, "200 OK", &description_document(device_type));
        return;
    }

    if request_line.starts_with("POST /ctl/WANIP") {
        control_hits.fetch_add(1, Ordering::SeqCst);

        if body.contains("u:AddPortMapping") {
            let port: u16 = tag_text(body, "NewExternalPort").parse().unwrap();
            let protocol = tag_text(body, "NewProtocol");
            mappings.lock().unwrap().insert((port, protocol));
            write_http_response(stream, "200 OK", &action_response("AddPortMapping", ""));
        } else if body.contains("u:DeletePortMapping") {
            let port: u16 = tag_text(body, "NewExternalPort").parse().unwrap();
            let protocol = tag_text(body, "NewProtocol");
            let existed = mappings.lock().unwrap().remove(&(port, protocol));
            if existed {
                write_http_response(stream, "200 OK", &action_response("DeletePortMapping", ""));
            } else {
                write_http_response(stream, "500 Internal Server Error", FAULT_714);
            }
        } else if body.contains("u:GetExternalIPAddress") {
            let values = format!("<NewExternalIPAddress>{}</NewExternalIPAddress>", EXTERNAL_IP);
            write_http_response(
                stream,
                "200 OK",
                &action_response("GetExternalIPAddress", &values),
            );
        } else {
            write_http_response(stream, "500 Internal Server Error", FAULT_401);
        }
        return;
    }

    write_http_response(stream, "404 Not Found", "");
}

fn write_http_response(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn tag_text(body: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open).map(|pos| pos + open.len()).unwrap_or(0);
    let end = body.find(&close).unwrap_or(start);
    body[start..end].to_string()
}

fn description_document(device_type: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>{}</deviceType>
    <friendlyName>Mock Gateway</friendlyName>
    <deviceList>
      <device>
        <deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
        <deviceList>
          <device>
            <deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
            <serviceList>
              <service>
                <serviceType>urn:schemas-upnp-org:service:WANIPConnection:1</serviceType>
                <serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>
                <controlURL>/ctl/WANIP</controlURL>
                <eventSubURL>/evt/WANIP</eventSubURL>
                <SCPDURL>/WANIPCn.xml</SCPDURL>
              </service>
            </serviceList>
          </device>
        </deviceList>
      </device>
    </deviceList>
  </device>
</root>"#,
        device_type
    )
}

fn action_response(action: &str, values: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:{action}Response xmlns:u="urn:schemas-upnp-org:service:WANIPConnection:1">{values}</u:{action}Response>
  </s:Body>
</s:Envelope>"#
    )
}

const FAULT_714: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>714</errorCode>
          <errorDescription>NoSuchEntryInArray</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

const FAULT_401: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <s:Fault>
      <faultcode>s:Client</faultcode>
      <faultstring>UPnPError</faultstring>
      <detail>
        <UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
          <errorCode>401</errorCode>
          <errorDescription>Invalid Action</errorDescription>
        </UPnPError>
      </detail>
    </s:Fault>
  </s:Body>
</s:Envelope>"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn discover_caches_control_and_event_urls() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    assert!(cp.discover(true));
    assert!(cp.is_discovered());
    assert!(cp.is_available());

    // Les URLs relatives de la description sont résolues contre l'autorité
    // de l'URL LOCATION (hôte + port du serveur HTTP de la passerelle).
    let description_url = cp.description_url().unwrap();
    let base = description_url.strip_suffix("/desc.xml").unwrap().to_string();
    assert_eq!(cp.control_url().unwrap(), format!("{}/ctl/WANIP", base));
    assert_eq!(cp.event_url().unwrap(), format!("{}/evt/WANIP", base));
    assert!(cp.last_error().is_none());
}

#[test]
fn discover_twice_makes_one_ssdp_round_trip() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    assert!(cp.discover(false));
    assert!(cp.discover(false));
    assert_eq!(mock.msearches(), 1);
}

#[test]
fn forced_rediscovery_makes_a_new_round_trip() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    assert!(cp.discover(false));
    assert!(cp.discover(true));
    assert_eq!(mock.msearches(), 2);
}

#[test]
fn concurrent_discovery_is_serialized() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = Arc::new(mock.control_point());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cp = Arc::clone(&cp);
            thread::spawn(move || cp.discover(false))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
    assert_eq!(mock.msearches(), 1);
}

#[test]
fn add_then_delete_leaves_no_mapping() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    cp.add_port_mapping(9000, PortMappingProtocol::Tcp, "pmogateway test")
        .unwrap();
    assert!(mock.has_mapping(9000, "TCP"));

    cp.delete_port_mapping(9000, PortMappingProtocol::Tcp)
        .unwrap();
    assert!(!mock.has_mapping(9000, "TCP"));
}

#[test]
fn delete_never_mapped_port_succeeds() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    // La passerelle répond par un fault UPnP 714; l'entrée est déjà
    // absente, l'appel doit réussir.
    cp.delete_port_mapping(9100, PortMappingProtocol::Udp)
        .unwrap();
}

#[test]
fn add_port_mapping_auto_discovers() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    assert!(!cp.is_discovered());
    cp.add_port_mapping(9200, PortMappingProtocol::Udp, "auto discover")
        .unwrap();
    assert!(cp.is_available());
    assert_eq!(mock.msearches(), 1);
}

#[test]
fn non_gateway_device_is_absorbed_without_soap_calls() {
    init_tracing();
    let mock = MockIgd::start(
        SsdpMode::Announce,
        "urn:schemas-upnp-org:device:MediaRenderer:1",
    );
    let cp = mock.control_point();

    assert!(!cp.discover(true));
    assert!(cp.is_discovered());
    assert!(!cp.is_available());
    assert!(cp.control_url().is_none());
    assert!(matches!(
        cp.last_error(),
        Some(GatewayError::NotGatewayDevice(_))
    ));
    assert_eq!(mock.control_hits.load(Ordering::SeqCst), 0);

    // Échec mémorisé: une opération de contrôle ne relance pas la
    // découverte tant que force n'est pas demandé.
    let err = cp
        .add_port_mapping(9300, PortMappingProtocol::Tcp, "should fail")
        .unwrap_err();
    assert_eq!(err, GatewayError::NoGatewayAvailable);
    assert_eq!(mock.msearches(), 1);
}

#[test]
fn ssdp_response_without_location_is_absorbed() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::MissingLocation, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    assert!(!cp.discover(true));
    assert!(!cp.is_available());
    assert!(matches!(cp.last_error(), Some(GatewayError::Protocol(_))));
}

#[test]
fn silent_network_is_absorbed_as_transport_failure() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Silent, IGD_DEVICE_TYPE);
    let cp = mock.control_point();
    cp.set_discovery_timeout(Duration::from_millis(200));

    assert!(!cp.discover(true));
    assert!(cp.is_discovered());
    assert!(!cp.is_available());
    assert!(matches!(cp.last_error(), Some(GatewayError::Transport(_))));
}

#[test]
fn external_ip_before_discovery_fails() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    // Pas de découverte implicite pour cette opération.
    assert_eq!(cp.external_ip().unwrap_err(), GatewayError::NotDiscovered);
    assert_eq!(mock.msearches(), 0);
}

#[test]
fn external_ip_parses_gateway_answer() {
    init_tracing();
    let mock = MockIgd::start(SsdpMode::Announce, IGD_DEVICE_TYPE);
    let cp = mock.control_point();

    assert!(cp.discover(true));
    let ip = cp.external_ip().unwrap();
    assert_eq!(ip.to_string(), EXTERNAL_IP);
}
