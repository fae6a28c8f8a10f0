use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use micro_connector::adapter::Adapter;
use micro_connector::codec::{HeaderLine, InputFilter, parse_header, parse_request_line};
use micro_connector::config::ConnectorConfig;
use micro_connector::connection::{Exchange, Http11Processor};
use micro_connector::protocol::{BoxError, PayloadItem};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::Decoder;
use triomphe::Arc;

const REQUEST: &[u8] = b"GET /index.html?lang=rust HTTP/1.1\r\n\
Host: localhost:8080\r\n\
User-Agent: criterion\r\n\
Accept: text/html,application/xhtml+xml\r\n\
Accept-Encoding: gzip, deflate\r\n\
Connection: keep-alive\r\n\r\n";

// Mock IO for testing
struct MockIO {
    read_data: Vec<u8>,
    read_pos: usize,
    written: usize,
}

impl MockIO {
    fn new(read_data: Vec<u8>) -> Self {
        Self { read_data, read_pos: 0, written: 0 }
    }
}

impl AsyncRead for MockIO {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let remaining = &self.read_data[self.read_pos..];
        let amt = std::cmp::min(remaining.len(), buf.remaining());
        buf.put_slice(&remaining[..amt]);
        self.read_pos += amt;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockIO {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
        self.written += buf.len();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Poll::Ready(Ok(()))
    }
}

impl micro_connector::connection::Transport for MockIO {}

struct HelloWorld;

impl Adapter for HelloWorld {
    async fn service(&self, exchange: &mut Exchange<'_>) -> Result<(), BoxError> {
        exchange.response_mut().set_content_length(12);
        exchange.write("Hello World!").await?;
        Ok(())
    }
}

fn bench_parse_head(c: &mut Criterion) {
    c.bench_function("parse_request_head", |b| {
        b.iter(|| {
            let (line, mut pos) = parse_request_line(black_box(REQUEST)).unwrap().unwrap();
            black_box(line);
            while let Some((header, consumed)) = parse_header(&REQUEST[pos..]).unwrap() {
                pos += consumed;
                if header == HeaderLine::End {
                    break;
                }
                black_box(header);
            }
        });
    });
}

fn bench_chunked_body(c: &mut Criterion) {
    let mut body = Vec::new();
    for _ in 0..64 {
        body.extend_from_slice(b"400\r\n");
        body.extend_from_slice(&[b'x'; 0x400]);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(b"0\r\n\r\n");

    c.bench_function("decode_chunked_body", |b| {
        b.iter(|| {
            let mut decoder = InputFilter::chunked();
            let mut src = BytesMut::from(&body[..]);
            while let Some(PayloadItem::Chunk(bytes)) = decoder.decode(&mut src).unwrap() {
                black_box(bytes);
            }
        });
    });
}

fn bench_process_request(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let config = Arc::new(ConnectorConfig::default());
    let adapter = HelloWorld;

    c.bench_function("process_simple_request", |b| {
        b.to_async(&runtime).iter(|| async {
            let mut io = MockIO::new(REQUEST.to_vec());
            let mut processor = Http11Processor::new(Arc::clone(&config));
            processor.run(&mut io, &adapter).await;
            black_box(io.written);
        });
    });
}

criterion_group!(benches, bench_parse_head, bench_chunked_body, bench_process_request);
criterion_main!(benches);
