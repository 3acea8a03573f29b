use rstest::rstest;
use xpath_sniff::{ExpandedName, QueryModel, ResultGraph, SaxEvent, SniffError, SniffOptions, Sniffer, XmlSource};

fn sniff(events: Vec<SaxEvent>) -> Result<usize, SniffError> {
    let mut model = QueryModel::new();
    let a = model.path(&["a"]).unwrap();
    model.mark_user_given(a).unwrap();
    let graph = ResultGraph::new();
    let sniffer = Sniffer::new(&model, &graph, SniffOptions::default());
    sniffer.sniff(events.into_iter(), 0).map(|results| results.hit_count(a))
}

#[rstest]
#[case::end_without_start(vec![SaxEvent::StartDocument, SaxEvent::EndElement, SaxEvent::EndDocument])]
#[case::start_before_document(vec![SaxEvent::start("a"), SaxEvent::EndElement])]
#[case::document_left_open(vec![SaxEvent::StartDocument, SaxEvent::start("a"), SaxEvent::EndDocument])]
#[case::source_ends_early(vec![SaxEvent::StartDocument, SaxEvent::start("a"), SaxEvent::EndElement])]
#[case::document_started_twice(vec![SaxEvent::StartDocument, SaxEvent::StartDocument])]
fn malformed_event_order_is_rejected(#[case] events: Vec<SaxEvent>) {
    assert!(matches!(sniff(events), Err(SniffError::ProtocolViolation(_))));
}

#[test]
fn well_formed_events_are_accepted() {
    let events = vec![
        SaxEvent::StartDocument,
        SaxEvent::start("a"),
        SaxEvent::text("x"),
        SaxEvent::EndElement,
        SaxEvent::EndDocument,
    ];
    assert_eq!(sniff(events), Ok(1));
}

#[test]
fn start_after_end_document_is_rejected() {
    let model = QueryModel::new();
    let graph = ResultGraph::new();
    let sniffer = Sniffer::new(&model, &graph, SniffOptions::default());
    let mut session = sniffer.session();
    session.start_document().unwrap();
    session.end_document().unwrap();
    assert!(matches!(
        session.start_element(&ExpandedName::local("a"), &[]),
        Err(SniffError::ProtocolViolation(_))
    ));
}

#[rstest]
#[case("<a><b></a>")]
#[case("<p:a/>")]
fn reader_errors_surface_as_xml_errors(#[case] xml: &str) {
    let model = QueryModel::new();
    let graph = ResultGraph::new();
    let sniffer = Sniffer::new(&model, &graph, SniffOptions::default());
    assert!(matches!(sniffer.sniff(XmlSource::from_str(xml), 0), Err(SniffError::Xml(_))));
}
