//! C4-PlantUML serializer: turns a validated [`Graph`] into the DSL block
//! submitted to the renderer.

use crate::models::{Container, Graph, Relation};

use super::DiagramError;

const HEADER: &str = "@startuml\n!include https://raw.githubusercontent.com/plantuml-stdlib/C4-PlantUML/master/C4_Container.puml\n";
const DEFAULT_FOOTER: &str = "generated by diagramastext.dev - %date('yyyy-MM-dd')";

/// Serialize the graph into a `@startuml…@enduml` block.
///
/// Containers without a `system` are emitted first in input order; every
/// distinct non-empty `system` becomes a `System_Boundary` group, in order
/// of first appearance.
pub fn serialize(g: &Graph) -> Result<String, DiagramError> {
    if g.containers.is_empty() {
        return Err(DiagramError::InvalidGraph("no containers found".to_string()));
    }

    let mut o = String::new();
    o.push_str(HEADER);
    write_footer(&mut o, &g.footer);
    write_title(&mut o, &g.title);

    // group containers by system, preserving first-appearance order
    let mut groups: Vec<(&str, Vec<String>)> = Vec::new();
    for n in &g.containers {
        if n.id.is_empty() {
            return Err(DiagramError::InvalidGraph(
                "container must be identified: 'id' attribute".to_string(),
            ));
        }
        let rendered = dsl_container(n);
        match groups.iter().position(|(system, _)| *system == n.system) {
            Some(at) => groups[at].1.push(rendered),
            None => groups.push((&n.system, vec![rendered])),
        }
    }

    write_systems(&mut o, &groups);
    o.push('\n');

    for l in &g.relations {
        if l.from.is_empty() || l.to.is_empty() {
            return Err(DiagramError::InvalidGraph(
                "relation must specify the end nodes: 'from' and 'to' attributes".to_string(),
            ));
        }
        write_relation(&mut o, l);
        o.push('\n');
    }

    if g.with_legend {
        o.push_str("SHOW_LEGEND()\n");
    }
    o.push_str("@enduml");

    Ok(o)
}

/// Trim surrounding whitespace and flatten embedded newlines to the literal
/// `\n`. Double quotes pass through unescaped.
pub fn clean(s: &str) -> String {
    s.trim().replace('\n', "\\n")
}

fn write_footer(o: &mut String, footer: &str) {
    let footer = if footer.is_empty() {
        DEFAULT_FOOTER
    } else {
        footer
    };
    o.push_str("footer \"");
    o.push_str(&clean(footer));
    o.push_str("\"\n");
}

fn write_title(o: &mut String, title: &str) {
    if title.is_empty() {
        return;
    }
    o.push_str("title \"");
    o.push_str(&clean(title));
    o.push_str("\"\n");
}

fn write_systems(o: &mut String, groups: &[(&str, Vec<String>)]) {
    if let Some((_, members)) = groups.iter().find(|(system, _)| system.is_empty()) {
        o.push_str(&members.join("\n"));
    }

    for (system, members) in groups.iter().filter(|(system, _)| !system.is_empty()) {
        let description = clean(system);
        let id: String = description.chars().filter(|c| !" \n".contains(*c)).collect();
        o.push_str("\nSystem_Boundary(");
        o.push_str(&id);
        o.push_str(", \"");
        o.push_str(&description);
        o.push_str("\") {\n");
        o.push_str(&members.join("\n"));
        o.push_str("\n}");
    }
}

fn container_tag(n: &Container) -> String {
    let mut tag = String::new();
    if n.is_user {
        tag.push_str("User");
    } else {
        tag.push_str("Container");
        // both markers at once degrade to a plain container
        if n.is_queue && !n.is_database {
            tag.push_str("Queue");
        } else if n.is_database && !n.is_queue {
            tag.push_str("Db");
        }
    }
    if n.is_external {
        tag.push_str("_Ext");
    }
    tag
}

fn dsl_container(n: &Container) -> String {
    let mut o = container_tag(n);

    o.push('(');
    o.push_str(&n.id);

    let label = if n.label.is_empty() { &n.id } else { &n.label };
    o.push_str(", \"");
    o.push_str(&clean(label));
    o.push('"');

    if !n.technology.is_empty() {
        o.push_str(", \"");
        o.push_str(&clean(&n.technology));
        o.push('"');
    }

    if !n.description.is_empty() {
        o.push_str(", \"");
        o.push_str(&clean(&n.description));
        o.push('"');
    }

    o.push(')');
    o
}

fn write_relation(o: &mut String, l: &Relation) {
    o.push_str("Rel");

    let d = relation_direction(&l.direction);
    if !d.is_empty() {
        o.push('_');
        o.push_str(d);
    }

    o.push('(');
    o.push_str(&l.from);
    o.push_str(", ");
    o.push_str(&l.to);

    let label = if l.label.is_empty() { "Uses" } else { &l.label };
    o.push_str(", \"");
    o.push_str(&clean(label));
    o.push('"');

    if !l.technology.is_empty() {
        o.push_str(", \"");
        o.push_str(&clean(&l.technology));
        o.push('"');
    }

    o.push(')');
}

fn relation_direction(s: &str) -> &'static str {
    match s.to_uppercase().as_str() {
        "LR" => "R",
        "RL" => "L",
        "TD" => "D",
        "DT" => "U",
        _ => "",
    }
}
