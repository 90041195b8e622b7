//! GEXF export (write-only), for inspection in Gephi and friends.

use std::io::Write;
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::graph::Graph;

const GEXF_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<gexf xmlns=\"http://www.gexf.net/1.2draft\" version=\"1.2\">\n\
<meta>\n\
<creator>simgraph</creator>\n\
<description></description>\n\
</meta>\n\
<graph mode=\"static\" defaultedgetype=\"directed\">\n";

fn escape(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl<T> Graph<T> {
    /// Write the graph as GEXF: one `<node>` per item, one directed
    /// `<edge>` per neighbor-list entry, weighted by similarity.
    pub fn write_gexf<W: Write>(&self, out: &mut W) -> Result<()> {
        let io = |e: std::io::Error| GraphError::Export(e.to_string());

        out.write_all(GEXF_HEADER.as_bytes()).map_err(io)?;

        writeln!(out, "<nodes>").map_err(io)?;
        for id in self.sorted_ids() {
            let id = escape(id.as_str());
            writeln!(out, "<node id=\"{id}\" label=\"{id}\" />").map_err(io)?;
        }
        writeln!(out, "</nodes>").map_err(io)?;

        writeln!(out, "<edges>").map_err(io)?;
        let mut edge_id = 0usize;
        for source in self.sorted_ids() {
            let Some(nl) = self.get(&source) else {
                continue;
            };
            for neighbor in nl {
                writeln!(
                    out,
                    "<edge id=\"{}\" source=\"{}\" target=\"{}\" weight=\"{}\" />",
                    edge_id,
                    escape(source.as_str()),
                    escape(neighbor.id.as_str()),
                    neighbor.similarity,
                )
                .map_err(io)?;
                edge_id += 1;
            }
        }
        writeln!(out, "</edges>").map_err(io)?;

        write!(out, "</graph>\n</gexf>").map_err(io)?;
        Ok(())
    }

    /// Write the graph as a GEXF file.
    pub fn export_gexf(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)
            .map_err(|e| GraphError::Export(e.to_string()))?;
        self.write_gexf(&mut file)
    }
}
